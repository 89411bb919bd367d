//! Result normalization
//!
//! Maps raw provider responses onto the canonical result schemas. Each
//! normalizer is a pure function of the raw response: the same input always
//! produces the same result, including provenance (which takes its timestamp
//! from the response rather than the clock).
//!
//! Normalizers are total over partially populated responses. Missing or
//! unrecognized fields become explicit unknown or empty values and are named
//! in the result's `gaps`. Only a response with no recognizable structure at
//! all is an error.

mod chart;
mod sheet;
mod toc;

use crate::document::{ExtractionKind, Fingerprint};
use crate::extraction::{ExtractionPayload, ExtractionResult, Freshness, Provenance};
use crate::provider::RawProviderResponse;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("Unrecognized {kind} response: {reason}")]
    Unrecognized { kind: ExtractionKind, reason: String },
}

impl NormalizeError {
    fn unrecognized(kind: ExtractionKind, reason: impl Into<String>) -> Self {
        Self::Unrecognized {
            kind,
            reason: reason.into(),
        }
    }
}

/// Ordered, de-duplicated list of degraded field paths
#[derive(Debug, Default)]
pub(crate) struct Gaps(Vec<String>);

impl Gaps {
    pub fn note(&mut self, field: impl Into<String>) {
        let field = field.into();
        if !self.0.contains(&field) {
            self.0.push(field);
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

/// Normalize a raw provider response into a fresh extraction result
pub fn normalize(
    raw: &RawProviderResponse,
    fingerprint: &Fingerprint,
) -> Result<ExtractionResult, NormalizeError> {
    let mut gaps = Gaps::default();

    let payload = match raw.kind {
        ExtractionKind::Toc => ExtractionPayload::Toc(toc::normalize(&raw.body, &mut gaps)?),
        ExtractionKind::Chart => ExtractionPayload::Chart(chart::normalize(&raw.body, &mut gaps)?),
        ExtractionKind::Spreadsheet => {
            ExtractionPayload::Spreadsheet(sheet::normalize(&raw.body, &mut gaps)?)
        }
    };

    let gaps = gaps.into_vec();
    if !gaps.is_empty() {
        tracing::debug!(
            fingerprint = %fingerprint.short(),
            provider = %raw.provider,
            gaps = gaps.len(),
            "Normalized a degraded response"
        );
    }

    Ok(ExtractionResult {
        payload,
        gaps,
        provenance: Provenance {
            provider: raw.provider.clone(),
            fingerprint: fingerprint.clone(),
            extracted_at: raw.received_at,
        },
        freshness: Freshness::Fresh,
    })
}

/// Numeric value of a JSON number or a number-like string ("1,234", "12%", "$5")
pub(crate) fn number_from(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    }
}

pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_start_matches(['$', '€', '£'])
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}
