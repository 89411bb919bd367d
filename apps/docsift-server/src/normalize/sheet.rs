use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{parse_number, Gaps, NormalizeError};
use crate::document::ExtractionKind;
use crate::extraction::{Cell, CellValue, Row, Sheet, SpreadsheetResult, UNKNOWN};

/// Sheet name used for layout-analysis output
const LAYOUT_SHEET: &str = "Sheet1";

/// Worksheet bounds (the XLSX limits); layout cells outside them are dropped
const MAX_ROWS: u64 = 1_048_576;
const MAX_COLUMNS: u64 = 16_384;

static NUMERIC_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?$").expect("valid regex")
});

fn error(reason: impl Into<String>) -> NormalizeError {
    NormalizeError::unrecognized(ExtractionKind::Spreadsheet, reason)
}

pub(super) fn normalize(body: &Value, gaps: &mut Gaps) -> Result<SpreadsheetResult, NormalizeError> {
    if let Some(workbook) = body.get("workbook") {
        return from_workbook(workbook, gaps);
    }

    let analysis = match body.get("analyzeResult") {
        Some(analysis) => analysis,
        None if body.get("tables").is_some() || body.get("pages").is_some() => body,
        None => return Err(error("no workbook or analyzeResult")),
    };
    from_layout(analysis, gaps)
}

/// Typed value of a cell's text
pub(crate) fn typed_text(text: &str) -> CellValue {
    let text = text.trim();
    if text.is_empty() {
        return CellValue::Empty;
    }
    // Currency and percent signs are dropped: "$5" is 5, "12%" is 12
    let bare = text
        .trim_start_matches(['$', '€', '£'])
        .trim_end_matches('%')
        .trim();
    if NUMERIC_TEXT.is_match(bare) {
        if let Some(number) = parse_number(bare) {
            return CellValue::Number(number);
        }
    }
    CellValue::Text(text.to_string())
}

// ============================================================================
// Native workbooks
// ============================================================================

fn from_workbook(workbook: &Value, gaps: &mut Gaps) -> Result<SpreadsheetResult, NormalizeError> {
    let raw_sheets = workbook
        .get("sheets")
        .and_then(Value::as_array)
        .ok_or_else(|| error("workbook has no sheets list"))?;

    let sheets: Vec<Sheet> = raw_sheets
        .iter()
        .enumerate()
        .map(|(s, raw)| {
            let name = match raw.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => {
                    gaps.note(format!("sheets[{}].name", s));
                    format!("Sheet{}", s + 1)
                }
            };

            let rows = match raw.get("rows").and_then(Value::as_array) {
                Some(rows) => rows
                    .iter()
                    .enumerate()
                    .map(|(r, row)| workbook_row(row, s, r, gaps))
                    .collect(),
                None => {
                    gaps.note(format!("sheets[{}].rows", s));
                    Vec::new()
                }
            };

            Sheet { name, rows }
        })
        .collect();

    let active_sheet = match workbook.get("active").and_then(Value::as_str) {
        Some(active) if sheets.iter().any(|sheet| sheet.name == active) => active.to_string(),
        _ => {
            gaps.note("activeSheet");
            sheets
                .first()
                .map(|sheet| sheet.name.clone())
                .unwrap_or_else(|| UNKNOWN.to_string())
        }
    };
    if sheets.is_empty() {
        gaps.note("sheets");
    }

    Ok(SpreadsheetResult {
        active_sheet,
        sheets,
    })
}

fn workbook_row(row: &Value, s: usize, r: usize, gaps: &mut Gaps) -> Row {
    let cells = match row.as_array() {
        Some(cells) => cells
            .iter()
            .enumerate()
            .map(|(c, value)| Cell {
                index: c as u32 + 1,
                value: match value {
                    Value::Null => CellValue::Empty,
                    Value::Bool(b) => CellValue::Bool(*b),
                    Value::Number(n) => n.as_f64().map_or(CellValue::Empty, CellValue::Number),
                    Value::String(text) => typed_text(text),
                    _ => {
                        gaps.note(format!("sheets[{}].rows[{}][{}]", s, r, c));
                        CellValue::Empty
                    }
                },
            })
            .collect(),
        None => {
            gaps.note(format!("sheets[{}].rows[{}]", s, r));
            Vec::new()
        }
    };

    Row {
        index: r as u32 + 1,
        cells,
    }
}

// ============================================================================
// Layout analysis
// ============================================================================

type Point = (f64, f64);

/// Polygon from a flat `[x1, y1, x2, y2, ...]` list or a list of `{x, y}`
pub(crate) fn polygon(value: &Value) -> Option<Vec<Point>> {
    let items = value.as_array()?;

    let points: Vec<Point> = if items.iter().all(Value::is_number) {
        if items.len() % 2 != 0 {
            return None;
        }
        items
            .chunks_exact(2)
            .map(|pair| Some((pair[0].as_f64()?, pair[1].as_f64()?)))
            .collect::<Option<Vec<Point>>>()?
    } else {
        items
            .iter()
            .map(|p| Some((p.get("x")?.as_f64()?, p.get("y")?.as_f64()?)))
            .collect::<Option<Vec<Point>>>()?
    };

    (points.len() >= 3).then_some(points)
}

/// Ray casting; points on an edge may land either way
pub(crate) fn contains(polygon: &[Point], (px, py): Point) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    (sx / n, sy / n)
}

struct PlacedTable {
    polygon: Vec<Point>,
    ymin: f64,
    ymax: f64,
    xmin: f64,
    columns: usize,
    /// (row, column, text) with column spans already repeated
    cells: Vec<(usize, usize, String)>,
}

struct Band {
    tables: Vec<PlacedTable>,
    ymin: f64,
    ymax: f64,
}

enum Element {
    Band { y: f64, rows: BTreeMap<usize, Vec<(usize, String)>> },
    Line { y: f64, text: String },
}

impl Element {
    fn y(&self) -> f64 {
        match self {
            Self::Band { y, .. } | Self::Line { y, .. } => *y,
        }
    }
}

fn bounding_region(value: &Value) -> Option<(u64, Vec<Point>)> {
    let region = value.get("boundingRegions")?.get(0)?;
    let page = region.get("pageNumber")?.as_u64()?;
    let polygon = region
        .get("polygon")
        .or_else(|| region.get("boundingBox"))
        .and_then(polygon)?;
    Some((page, polygon))
}

fn place_table(t: usize, table: &Value, gaps: &mut Gaps) -> Option<(u64, PlacedTable)> {
    let Some((page, polygon)) = bounding_region(table) else {
        gaps.note(format!("tables[{}].boundingRegions", t));
        return None;
    };
    let Some(raw_cells) = table.get("cells").and_then(Value::as_array) else {
        gaps.note(format!("tables[{}].cells", t));
        return None;
    };

    // Spans past the declared width are clipped to it
    let column_limit = table
        .get("columnCount")
        .and_then(Value::as_u64)
        .filter(|count| *count > 0)
        .map_or(MAX_COLUMNS, |count| count.min(MAX_COLUMNS));

    let mut cells = Vec::new();
    for (c, cell) in raw_cells.iter().enumerate() {
        let (Some(row), Some(column)) = (
            cell.get("rowIndex").and_then(Value::as_u64),
            cell.get("columnIndex").and_then(Value::as_u64),
        ) else {
            gaps.note(format!("tables[{}].cells[{}]", t, c));
            continue;
        };
        let text = match cell.get("content").and_then(Value::as_str) {
            Some(text) => text.trim().to_string(),
            None => {
                gaps.note(format!("tables[{}].cells[{}].content", t, c));
                String::new()
            }
        };
        if row >= MAX_ROWS || column >= column_limit {
            gaps.note(format!("tables[{}].cells[{}]", t, c));
            continue;
        }
        let span = cell
            .get("columnSpan")
            .and_then(Value::as_u64)
            .unwrap_or(1)
            .clamp(1, column_limit - column);
        for offset in 0..span {
            cells.push((row as usize, (column + offset) as usize, text.clone()));
        }
    }

    // Width from the cells actually present, as the service's count may lag spans
    let columns = cells
        .iter()
        .map(|(_, column, _)| column + 1)
        .max()
        .unwrap_or(0);

    let ys = polygon.iter().map(|p| p.1);
    let ymin = ys.clone().fold(f64::INFINITY, f64::min);
    let ymax = ys.fold(f64::NEG_INFINITY, f64::max);
    let xmin = polygon.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);

    Some((
        page,
        PlacedTable {
            polygon,
            ymin,
            ymax,
            xmin,
            columns,
            cells,
        },
    ))
}

/// Group tables whose vertical extents overlap. A table joins the first
/// band it overlaps; bands are not merged with each other afterwards.
fn cluster_bands(tables: Vec<PlacedTable>) -> Vec<Band> {
    let mut bands: Vec<Band> = Vec::new();
    for table in tables {
        match bands
            .iter_mut()
            .find(|band| !(table.ymax < band.ymin || table.ymin > band.ymax))
        {
            Some(band) => {
                band.ymin = band.ymin.min(table.ymin);
                band.ymax = band.ymax.max(table.ymax);
                band.tables.push(table);
            }
            None => bands.push(Band {
                ymin: table.ymin,
                ymax: table.ymax,
                tables: vec![table],
            }),
        }
    }
    bands
}

fn band_rows(mut band: Band) -> BTreeMap<usize, Vec<(usize, String)>> {
    band.tables
        .sort_by(|a, b| a.xmin.partial_cmp(&b.xmin).unwrap_or(Ordering::Equal));

    let mut rows: BTreeMap<usize, Vec<(usize, String)>> = BTreeMap::new();
    let mut offset = 0;
    for table in band.tables {
        for (row, column, text) in table.cells {
            rows.entry(row).or_default().push((offset + column, text));
        }
        offset += table.columns;
    }
    for cells in rows.values_mut() {
        cells.sort_by_key(|(column, _)| *column);
    }
    rows
}

fn from_layout(analysis: &Value, gaps: &mut Gaps) -> Result<SpreadsheetResult, NormalizeError> {
    let raw_tables: &[Value] = match analysis.get("tables") {
        Some(Value::Array(tables)) => tables.as_slice(),
        Some(_) => return Err(error("tables is not a list")),
        None => {
            gaps.note("tables");
            &[]
        }
    };
    let raw_pages = analysis
        .get("pages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut tables_by_page: BTreeMap<u64, Vec<PlacedTable>> = BTreeMap::new();
    for (t, table) in raw_tables.iter().enumerate() {
        if let Some((page, placed)) = place_table(t, table, gaps) {
            tables_by_page.entry(page).or_default().push(placed);
        }
    }

    // Pages in document order, including pages that only appear on tables
    let mut page_numbers: Vec<u64> = raw_pages
        .iter()
        .filter_map(|page| page.get("pageNumber").and_then(Value::as_u64))
        .collect();
    for page in tables_by_page.keys() {
        if !page_numbers.contains(page) {
            page_numbers.push(*page);
        }
    }
    page_numbers.sort_unstable();
    page_numbers.dedup();

    let mut rows = Vec::new();
    let mut next_index: u32 = 1;

    for page_number in page_numbers {
        let tables = tables_by_page.remove(&page_number).unwrap_or_default();
        let polygons: Vec<Vec<Point>> = tables.iter().map(|t| t.polygon.clone()).collect();

        let mut elements: Vec<Element> = cluster_bands(tables)
            .into_iter()
            .map(|band| Element::Band {
                y: band.ymin,
                rows: band_rows(band),
            })
            .collect();

        let lines = raw_pages
            .iter()
            .find(|page| page.get("pageNumber").and_then(Value::as_u64) == Some(page_number))
            .and_then(|page| page.get("lines"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for line in lines {
            let (Some(text), Some(points)) = (
                line.get("content").and_then(Value::as_str),
                line.get("polygon").and_then(polygon),
            ) else {
                continue;
            };
            let center = centroid(&points);
            if polygons.iter().any(|poly| contains(poly, center)) {
                continue;
            }
            elements.push(Element::Line {
                y: center.1,
                text: text.trim().to_string(),
            });
        }

        elements.sort_by(|a, b| a.y().partial_cmp(&b.y()).unwrap_or(Ordering::Equal));

        for element in elements {
            match element {
                Element::Band { rows: band, .. } => {
                    for cells in band.into_values() {
                        let mut row_cells = Vec::with_capacity(cells.len());
                        for (column, text) in cells {
                            match u32::try_from(column).ok().and_then(|c| c.checked_add(1)) {
                                Some(index) => row_cells.push(Cell {
                                    index,
                                    value: typed_text(&text),
                                }),
                                None => gaps.note("tables"),
                            }
                        }
                        rows.push(Row {
                            index: next_index,
                            cells: row_cells,
                        });
                        next_index = next_index.saturating_add(1);
                    }
                    // Blank row after each band
                    next_index = next_index.saturating_add(1);
                }
                Element::Line { text, .. } => {
                    rows.push(Row {
                        index: next_index,
                        cells: vec![Cell {
                            index: 1,
                            value: typed_text(&text),
                        }],
                    });
                    next_index = next_index.saturating_add(1);
                }
            }
        }
    }

    Ok(SpreadsheetResult {
        active_sheet: LAYOUT_SHEET.to_string(),
        sheets: vec![Sheet {
            name: LAYOUT_SHEET.to_string(),
            rows,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_string())
    }

    fn cell_values(row: &Row) -> Vec<(u32, CellValue)> {
        row.cells.iter().map(|c| (c.index, c.value.clone())).collect()
    }

    fn table(page: u64, x0: f64, y0: f64, x1: f64, y1: f64, cells: Value) -> Value {
        json!({
            "boundingRegions": [{
                "pageNumber": page,
                "polygon": [x0, y0, x1, y0, x1, y1, x0, y1]
            }],
            "cells": cells
        })
    }

    #[test]
    fn test_typed_text() {
        assert_eq!(typed_text("1,234.50"), CellValue::Number(1234.5));
        assert_eq!(typed_text(" -7 "), CellValue::Number(-7.0));
        assert_eq!(typed_text(""), CellValue::Empty);
        assert_eq!(typed_text("12 units"), text("12 units"));
        assert_eq!(typed_text("1,23"), text("1,23"));
        assert_eq!(typed_text("12%"), CellValue::Number(12.0));
        assert_eq!(typed_text("$5"), CellValue::Number(5.0));
        assert_eq!(typed_text("€1,200.75"), CellValue::Number(1200.75));
        assert_eq!(typed_text("£ 3"), CellValue::Number(3.0));
        assert_eq!(typed_text("%"), text("%"));
        assert_eq!(typed_text("$abc"), text("$abc"));
    }

    #[test]
    fn test_point_in_polygon() {
        let square = polygon(&json!([0, 0, 10, 0, 10, 10, 0, 10])).unwrap();
        assert!(contains(&square, (5.0, 5.0)));
        assert!(!contains(&square, (15.0, 5.0)));
        assert!(!contains(&square, (5.0, -1.0)));

        let points = polygon(&json!([{ "x": 0, "y": 0 }, { "x": 4, "y": 0 }, { "x": 0, "y": 4 }])).unwrap();
        assert!(contains(&points, (1.0, 1.0)));
        assert!(!contains(&points, (3.0, 3.0)));
    }

    #[test]
    fn test_bad_polygons() {
        assert_eq!(polygon(&json!([1, 2, 3])), None);
        assert_eq!(polygon(&json!([1, 2, 3, 4])), None);
        assert_eq!(polygon(&json!("square")), None);
    }

    #[test]
    fn test_side_by_side_tables_merge_into_one_band() {
        let body = json!({
            "status": "succeeded",
            "analyzeResult": {
                "pages": [{
                    "pageNumber": 1,
                    "lines": [
                        { "content": "Quarterly report", "polygon": [0, 0, 8, 0, 8, 0.5, 0, 0.5] },
                        { "content": "Region", "polygon": [1, 1.2, 2, 1.2, 2, 1.4, 1, 1.4] },
                        { "content": "Notes follow", "polygon": [0, 5, 8, 5, 8, 5.5, 0, 5.5] }
                    ]
                }],
                "tables": [
                    table(1, 5.0, 1.0, 8.0, 3.0, json!([
                        { "rowIndex": 0, "columnIndex": 0, "content": "Q1" },
                        { "rowIndex": 1, "columnIndex": 0, "content": "10" }
                    ])),
                    table(1, 0.5, 1.1, 4.0, 3.2, json!([
                        { "rowIndex": 0, "columnIndex": 0, "content": "Region" },
                        { "rowIndex": 0, "columnIndex": 1, "content": "Total" },
                        { "rowIndex": 1, "columnIndex": 0, "content": "North" },
                        { "rowIndex": 1, "columnIndex": 1, "content": "1,200" }
                    ])),
                    table(1, 0.0, 6.0, 8.0, 7.0, json!([
                        { "rowIndex": 0, "columnIndex": 0, "columnSpan": 2, "content": "Footer" }
                    ]))
                ]
            }
        });

        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();
        assert_eq!(result.active_sheet, "Sheet1");
        let rows = &result.sheets[0].rows;

        // Title line, merged band (2 rows), gap, line between tables, span band
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].index, 1);
        assert_eq!(cell_values(&rows[0]), vec![(1, text("Quarterly report"))]);

        assert_eq!(rows[1].index, 2);
        assert_eq!(
            cell_values(&rows[1]),
            vec![(1, text("Region")), (2, text("Total")), (3, text("Q1"))]
        );
        assert_eq!(
            cell_values(&rows[2]),
            vec![(1, text("North")), (2, CellValue::Number(1200.0)), (3, CellValue::Number(10.0))]
        );

        assert_eq!(rows[3].index, 5);
        assert_eq!(cell_values(&rows[3]), vec![(1, text("Notes follow"))]);

        assert_eq!(rows[4].index, 6);
        assert_eq!(
            cell_values(&rows[4]),
            vec![(1, text("Footer")), (2, text("Footer"))]
        );
        assert!(gaps.into_vec().is_empty());
    }

    #[test]
    fn test_out_of_range_cells_are_gaps() {
        let body = json!({
            "tables": [
                table(1, 0.0, 0.0, 4.0, 2.0, json!([
                    { "rowIndex": 0, "columnIndex": 4294967295u64, "content": "x" },
                    { "rowIndex": 0, "columnIndex": u64::MAX, "content": "y" },
                    { "rowIndex": 4294967295u64, "columnIndex": 0, "content": "z" },
                    { "rowIndex": 0, "columnIndex": 0, "columnSpan": 1_000_000_000_000u64, "content": "wide" }
                ]))
            ]
        });

        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();
        let rows = &result.sheets[0].rows;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cells.len(), MAX_COLUMNS as usize);
        assert_eq!(rows[0].cells.last().map(|c| c.index), Some(MAX_COLUMNS as u32));
        assert_eq!(
            gaps.into_vec(),
            vec!["tables[0].cells[0]", "tables[0].cells[1]", "tables[0].cells[2]"]
        );
    }

    #[test]
    fn test_span_is_clipped_to_column_count() {
        let mut raw = table(1, 0.0, 0.0, 4.0, 2.0, json!([
            { "rowIndex": 0, "columnIndex": 1, "columnSpan": 50, "content": "Total" },
            { "rowIndex": 1, "columnIndex": 3, "content": "beyond" }
        ]));
        raw["columnCount"] = json!(3);

        let mut gaps = Gaps::default();
        let result = normalize(&json!({ "tables": [raw] }), &mut gaps).unwrap();
        let rows = &result.sheets[0].rows;

        assert_eq!(rows.len(), 1);
        assert_eq!(
            cell_values(&rows[0]),
            vec![(2, text("Total")), (3, text("Total"))]
        );
        assert_eq!(gaps.into_vec(), vec!["tables[0].cells[1]"]);
    }

    #[test]
    fn test_table_without_region_is_a_gap() {
        let body = json!({ "tables": [{ "cells": [] }], "pages": [] });
        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();
        assert!(result.sheets[0].rows.is_empty());
        assert_eq!(gaps.into_vec(), vec!["tables[0].boundingRegions"]);
    }

    #[test]
    fn test_workbook_shape() {
        let body = json!({
            "workbook": {
                "active": "Budget",
                "sheets": [
                    { "name": "Notes", "rows": [["hello"]] },
                    { "name": "Budget", "rows": [["Item", "Cost", "Paid"], ["Paper", 12.5, true], [null, "3", null]] }
                ]
            }
        });
        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();

        assert_eq!(result.active_sheet, "Budget");
        let budget = &result.sheets[1];
        assert_eq!(budget.rows[1].index, 2);
        assert_eq!(
            cell_values(&budget.rows[1]),
            vec![(1, text("Paper")), (2, CellValue::Number(12.5)), (3, CellValue::Bool(true))]
        );
        assert_eq!(
            cell_values(&budget.rows[2]),
            vec![(1, CellValue::Empty), (2, CellValue::Number(3.0)), (3, CellValue::Empty)]
        );
        assert!(gaps.into_vec().is_empty());
    }

    #[test]
    fn test_workbook_nested_cell_is_gap() {
        let body = json!({ "workbook": { "sheets": [{ "rows": [[{ "nested": true }]] }] } });
        let mut gaps = Gaps::default();
        let result = normalize(&body, &mut gaps).unwrap();

        assert_eq!(result.active_sheet, "Sheet1");
        assert_eq!(result.sheets[0].rows[0].cells[0].value, CellValue::Empty);
        assert_eq!(
            gaps.into_vec(),
            vec!["sheets[0].name", "sheets[0].rows[0][0]", "activeSheet"]
        );
    }

    #[test]
    fn test_unrecognized_body() {
        assert!(normalize(&json!({ "status": "failed" }), &mut Gaps::default()).is_err());
        assert!(normalize(&json!({ "analyzeResult": { "tables": "x" } }), &mut Gaps::default()).is_err());
    }
}
