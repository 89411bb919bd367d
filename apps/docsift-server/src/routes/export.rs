//! Spreadsheet export
//!
//! - POST /export-sheet - spreadsheet result JSON in, `.xlsx` download out
//!
//! The body is either a bare spreadsheet result (`{activeSheet, sheets}`) or
//! a whole `/parse-sheet` response, so a client can post back what it got.

use std::collections::HashSet;

use axum::{
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rust_xlsxwriter::Workbook;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::extraction::{CellValue, SpreadsheetResult};
use crate::state::AppState;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const EXPORT_FILENAME: &str = "export.xlsx";

/// Worksheet bounds (the XLSX limits)
const MAX_ROWS: u32 = 1_048_576;
const MAX_COLUMNS: u32 = 16_384;

#[derive(Deserialize)]
#[serde(untagged)]
pub enum ExportBody {
    Envelope { data: SpreadsheetResult },
    Result(SpreadsheetResult),
}

impl ExportBody {
    fn into_result(self) -> SpreadsheetResult {
        match self {
            Self::Envelope { data } | Self::Result(data) => data,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/export-sheet", post(export_sheet))
}

async fn export_sheet(Json(body): Json<ExportBody>) -> Result<Response> {
    let result = body.into_result();
    let bytes = tokio::task::spawn_blocking(move || build_workbook(&result))
        .await
        .map_err(|e| AppError::Internal(format!("Export task failed: {}", e)))??;

    tracing::debug!(size = bytes.len(), "Exported workbook");
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Render sheets in order; the sheet named by `activeSheet` opens first
fn build_workbook(result: &SpreadsheetResult) -> Result<Vec<u8>> {
    if result.sheets.is_empty() {
        return Err(AppError::BadRequest("At least one sheet is required".to_string()));
    }

    // Excel compares sheet names case-insensitively
    let mut seen = HashSet::new();
    for sheet in &result.sheets {
        if !seen.insert(sheet.name.to_lowercase()) {
            return Err(AppError::BadRequest(format!(
                "Duplicate sheet name '{}'",
                sheet.name
            )));
        }
    }

    let mut workbook = Workbook::new();
    for sheet in &result.sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&sheet.name)
            .map_err(|e| AppError::BadRequest(format!("Invalid sheet name '{}': {}", sheet.name, e)))?;
        if sheet.name == result.active_sheet {
            worksheet.set_active(true);
        }

        for row in &sheet.rows {
            if row.index == 0 || row.index > MAX_ROWS {
                return Err(AppError::BadRequest(format!(
                    "Row index {} is outside 1..={}",
                    row.index, MAX_ROWS
                )));
            }
            for cell in &row.cells {
                let column = u16::try_from(cell.index)
                    .ok()
                    .filter(|&column| column >= 1 && u32::from(column) <= MAX_COLUMNS)
                    .ok_or_else(|| {
                        AppError::BadRequest(format!(
                            "Cell index {} is outside 1..={}",
                            cell.index, MAX_COLUMNS
                        ))
                    })?;

                let (r, c) = (row.index - 1, column - 1);
                let written = match &cell.value {
                    CellValue::Empty => continue,
                    CellValue::Number(number) => worksheet.write_number(r, c, *number),
                    CellValue::Bool(flag) => worksheet.write_boolean(r, c, *flag),
                    CellValue::Text(text) => worksheet.write_string(r, c, text),
                };
                written.map_err(|e| AppError::BadRequest(format!("Unwritable cell: {}", e)))?;
            }
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| AppError::Internal(format!("Failed to write workbook: {}", e)))
}
