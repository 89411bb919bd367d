//! Document catalog listing
//!
//! GET /documents?kind=toc|chart|spreadsheet

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{DocumentRecord, DocumentRepository};
use crate::document::ExtractionKind;
use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub kind: Option<String>,
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentRecord>,
    pub total: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/documents", get(list_documents))
}

async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>> {
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<ExtractionKind>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let documents = DocumentRepository::new(state.db()).list(kind).await?;
    let total = documents.len();

    Ok(Json(DocumentListResponse { documents, total }))
}
