//! Local readers for native workbooks
//!
//! Produces `{"workbook": {"active": name, "sheets": [{"name", "rows"}]}}`
//! with one JSON array per row. Typing of CSV text is left to the
//! normalizer.

use std::io::Cursor;

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use serde_json::{json, Value};

use super::ProviderError;
use crate::document::MediaType;

pub const PROVIDER_NAME: &str = "workbook-reader";

/// Read an xlsx or csv document into the raw workbook shape
pub fn read(bytes: &[u8], media_type: MediaType) -> Result<Value, ProviderError> {
    match media_type {
        MediaType::Xlsx => read_xlsx(bytes),
        MediaType::Csv => read_csv(bytes),
        other => Err(ProviderError::InvalidInput(format!(
            "{} is not a workbook",
            other.mime()
        ))),
    }
}

fn read_xlsx(bytes: &[u8]) -> Result<Value, ProviderError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .map_err(|e| ProviderError::InvalidInput(format!("Could not open workbook: {}", e)))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(sheet = %name, "Skipping unreadable sheet: {}", e);
                continue;
            }
        };

        // Ranges start at the first used cell; pad so row/column 1 stay row/column 1
        let (row_offset, col_offset) = range
            .start()
            .map(|(row, col)| (row as usize, col as usize))
            .unwrap_or_default();

        let mut rows: Vec<Value> = vec![json!([]); row_offset];
        for row in range.rows() {
            let mut cells: Vec<Value> = vec![Value::Null; col_offset];
            cells.extend(row.iter().map(cell_json));
            rows.push(Value::Array(cells));
        }

        sheets.push(json!({ "name": name, "rows": rows }));
    }

    if sheets.is_empty() {
        return Err(ProviderError::InvalidInput(
            "Workbook contains no readable sheets".to_string(),
        ));
    }

    let active = sheets[0]["name"].clone();
    Ok(json!({ "workbook": { "active": active, "sheets": sheets } }))
}

fn cell_json(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => json!(s),
        Data::Float(f) => json!(f),
        Data::Int(i) => json!(*i as f64),
        Data::Bool(b) => json!(b),
        Data::DateTime(dt) => json!(dt.to_string()),
        Data::DateTimeIso(s) => json!(s),
        Data::DurationIso(s) => json!(s),
        Data::Error(e) => json!(format!("#ERR:{:?}", e)),
    }
}

fn read_csv(bytes: &[u8]) -> Result<Value, ProviderError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| ProviderError::InvalidInput(format!("Malformed CSV: {}", e)))?;
        let cells: Vec<Value> = record
            .iter()
            .map(|field| if field.is_empty() { Value::Null } else { json!(field) })
            .collect();
        rows.push(Value::Array(cells));
    }

    Ok(json!({ "workbook": { "active": "Sheet1", "sheets": [{ "name": "Sheet1", "rows": rows }] } }))
}
