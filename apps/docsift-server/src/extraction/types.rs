//! Canonical extraction results
//!
//! Every provider response is normalized into one of three payloads. The
//! payload, its gaps and provenance are what the cache stores and what the
//! HTTP layer returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{ExtractionKind, Fingerprint};

/// Placeholder for a value the provider did not supply
pub const UNKNOWN: &str = "unknown";

// ============================================================================
// Table of contents
// ============================================================================

/// One heading, in document order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocEntry {
    pub title: String,
    /// Nesting depth, 1 for top-level headings
    pub level: u32,
    /// First page (1-indexed), `None` when unknown
    pub page: Option<u32>,
    /// Start page of the next heading when it does not precede this one
    pub end_page: Option<u32>,
}

/// Ordered table of contents, stored as a pre-order list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocResult {
    pub entries: Vec<TocEntry>,
}

/// Nested view of a table of contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocNode {
    pub title: String,
    pub level: u32,
    pub page: Option<u32>,
    pub children: Vec<TocNode>,
}

impl TocResult {
    /// Rebuild the heading tree from the level of each entry
    pub fn tree(&self) -> Vec<TocNode> {
        fn attach(nodes: &mut Vec<TocNode>, node: TocNode) {
            match nodes.last_mut() {
                Some(last) if last.level < node.level => attach(&mut last.children, node),
                _ => nodes.push(node),
            }
        }

        let mut roots = Vec::new();
        for entry in &self.entries {
            attach(
                &mut roots,
                TocNode {
                    title: entry.title.clone(),
                    level: entry.level,
                    page: entry.page,
                    children: Vec::new(),
                },
            );
        }
        roots
    }
}

// ============================================================================
// Chart analysis
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub label: String,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Category label, when the x axis is categorical
    pub label: Option<String>,
    /// Numeric x position, when the x axis is numeric
    pub x: Option<f64>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Flat,
    Fluctuating,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartResult {
    pub title: Option<String>,
    pub axes: Vec<Axis>,
    pub series: Vec<Series>,
    pub trend: Trend,
}

// ============================================================================
// Spreadsheets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CellValue {
    Empty,
    Number(f64),
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Column (1-indexed)
    pub index: u32,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Row (1-indexed)
    pub index: u32,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetResult {
    pub active_sheet: String,
    pub sheets: Vec<Sheet>,
}

// ============================================================================
// Result envelope
// ============================================================================

/// Normalized payload, one variant per extraction kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ExtractionPayload {
    Toc(TocResult),
    Chart(ChartResult),
    Spreadsheet(SpreadsheetResult),
}

impl ExtractionPayload {
    pub fn kind(&self) -> ExtractionKind {
        match self {
            Self::Toc(_) => ExtractionKind::Toc,
            Self::Chart(_) => ExtractionKind::Chart,
            Self::Spreadsheet(_) => ExtractionKind::Spreadsheet,
        }
    }
}

/// Where a result came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub provider: String,
    pub fingerprint: Fingerprint,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Computed by a provider for this request
    Fresh,
    /// Served from the fingerprint store
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    #[serde(flatten)]
    pub payload: ExtractionPayload,
    /// Fields the provider left missing or unrecognized
    pub gaps: Vec<String>,
    pub provenance: Provenance,
    pub freshness: Freshness,
}

impl ExtractionResult {
    pub fn kind(&self) -> ExtractionKind {
        self.payload.kind()
    }

    pub fn is_degraded(&self) -> bool {
        !self.gaps.is_empty()
    }

    pub fn cache_hit(&self) -> bool {
        self.freshness == Freshness::Cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, level: u32, page: u32) -> TocEntry {
        TocEntry {
            title: title.to_string(),
            level,
            page: Some(page),
            end_page: None,
        }
    }

    #[test]
    fn test_toc_tree() {
        let toc = TocResult {
            entries: vec![
                entry("Intro", 1, 1),
                entry("Methods", 1, 4),
                entry("Results", 2, 9),
                entry("Tables", 3, 10),
                entry("Appendix", 1, 20),
            ],
        };

        let tree = toc.tree();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[1].title, "Methods");
        assert_eq!(tree[1].children.len(), 1);
        assert_eq!(tree[1].children[0].title, "Results");
        assert_eq!(tree[1].children[0].children[0].title, "Tables");
        assert!(tree[2].children.is_empty());
    }

    #[test]
    fn test_payload_serialization_shape() {
        let payload = ExtractionPayload::Toc(TocResult {
            entries: vec![entry("Intro", 1, 1)],
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "toc");
        assert_eq!(json["data"]["entries"][0]["title"], "Intro");
        assert_eq!(json["data"]["entries"][0]["endPage"], serde_json::Value::Null);
    }

    #[test]
    fn test_cell_value_serialization() {
        let json = serde_json::to_value(CellValue::Number(4.5)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "number", "value": 4.5}));
        let json = serde_json::to_value(CellValue::Empty).unwrap();
        assert_eq!(json, serde_json::json!({"type": "empty"}));
    }

    #[test]
    fn test_result_roundtrip_through_json() {
        let result = ExtractionResult {
            payload: ExtractionPayload::Toc(TocResult {
                entries: vec![entry("Intro", 1, 1)],
            }),
            gaps: vec![],
            provenance: Provenance {
                provider: "pdf-toc".to_string(),
                fingerprint: Fingerprint::compute(ExtractionKind::Toc, b"%PDF"),
                extracted_at: Utc::now(),
            },
            freshness: Freshness::Fresh,
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: ExtractionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.kind(), ExtractionKind::Toc);
    }
}
