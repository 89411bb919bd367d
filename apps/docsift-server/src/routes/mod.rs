//! HTTP routes for docsift

pub mod cache;
pub mod documents;
pub mod export;
pub mod extract;
pub mod health;

use axum::{extract::DefaultBodyLimit, Router};

use crate::state::AppState;

/// Full application router with state and the upload size limit applied
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.config().server.max_upload_bytes;

    Router::new()
        .merge(health::router())
        .merge(extract::router())
        .merge(export::router())
        .merge(documents::router())
        .merge(cache::router())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
