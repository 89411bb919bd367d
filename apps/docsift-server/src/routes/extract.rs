//! Extraction endpoints
//!
//! - POST /extract-toc   - PDF in, table of contents out
//! - POST /analyze-graph - chart image (or PDF page) in, chart analysis out
//! - POST /parse-sheet   - spreadsheet, scan or PDF in, sheets out
//!
//! Bodies are either the raw document bytes or `multipart/form-data` with a
//! `file` (or `document`) field.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Multipart, Query, Request, State},
    http::header,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::document::{Document, ExtractionKind};
use crate::extraction::{ExtractError, ExtractionRequest, ExtractionResult};
use crate::provider::ProviderOptions;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ExtractQuery {
    /// Name to record in the document catalog
    pub filename: Option<String>,
    /// Language hint forwarded to the provider
    pub language: Option<String>,
    /// Recompute even when a cached result exists
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub result: ExtractionResult,
    pub cache_hit: bool,
}

/// Uploaded document bytes, raw or from a multipart field
pub struct Upload {
    pub bytes: Bytes,
    pub filename: Option<String>,
}

#[async_trait]
impl<S> FromRequest<S> for Upload
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if !is_multipart {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            return Ok(Self {
                bytes,
                filename: None,
            });
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(IntoResponse::into_response)?
        {
            if !matches!(field.name(), Some("file" | "document")) {
                continue;
            }

            let filename = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.map_err(IntoResponse::into_response)?;
            tracing::debug!(filename = ?filename, size = bytes.len(), "Received multipart upload");
            return Ok(Self { bytes, filename });
        }

        tracing::warn!("No file field found in multipart upload");
        Err(ExtractError::invalid_input("No file provided. Use field name 'file' or 'document'")
            .into_response())
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/extract-toc", post(extract_toc))
        .route("/analyze-graph", post(analyze_graph))
        .route("/parse-sheet", post(parse_sheet))
}

// ============================================================================
// Handlers
// ============================================================================

async fn extract_toc(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
    upload: Upload,
) -> Result<Json<ExtractionResponse>, ExtractError> {
    extract(&state, ExtractionKind::Toc, query, upload).await
}

async fn analyze_graph(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
    upload: Upload,
) -> Result<Json<ExtractionResponse>, ExtractError> {
    extract(&state, ExtractionKind::Chart, query, upload).await
}

async fn parse_sheet(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
    upload: Upload,
) -> Result<Json<ExtractionResponse>, ExtractError> {
    extract(&state, ExtractionKind::Spreadsheet, query, upload).await
}

async fn extract(
    state: &AppState,
    kind: ExtractionKind,
    query: ExtractQuery,
    upload: Upload,
) -> Result<Json<ExtractionResponse>, ExtractError> {
    let filename = query.filename.or(upload.filename);
    let document = Document::new(upload.bytes, filename);
    tracing::debug!(
        kind = %kind,
        media_type = document.media_type().mime(),
        size = document.len(),
        "Extraction requested"
    );

    let request = ExtractionRequest::new(document, kind)
        .with_options(ProviderOptions {
            language: query.language,
        })
        .refreshing(query.refresh);

    let result = state.extraction().extract(request).await?;
    Ok(Json(ExtractionResponse {
        ok: true,
        cache_hit: result.cache_hit(),
        result,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use serde_json::{json, Value};

    use crate::config::Config;
    use crate::provider::testing::MockProvider;
    use crate::provider::{ProviderError, ProviderSet};
    use crate::routes;
    use crate::state::testing::test_state;

    const PDF: &[u8] = b"%PDF-1.4 three headings";

    fn providers() -> ProviderSet {
        ProviderSet::new(
            Arc::new(MockProvider::new(
                crate::document::ExtractionKind::Toc,
                json!({
                    "entries": [
                        { "title": "Intro", "page": 1 },
                        { "title": "Methods", "page": 4 },
                        { "title": "Results", "page": 9, "level": 2 }
                    ]
                }),
            )),
            Arc::new(MockProvider::failing(
                crate::document::ExtractionKind::Chart,
                ProviderError::RateLimited {
                    retry_after: Some(Duration::from_secs(7)),
                },
            )),
            Arc::new(MockProvider::failing(
                crate::document::ExtractionKind::Spreadsheet,
                ProviderError::Unavailable("upstream 503".to_string()),
            )),
        )
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.backoff_base_ms = 1;
        config
    }

    async fn server_with(config: Config) -> TestServer {
        server_over(config, providers()).await
    }

    async fn server_over(config: Config, providers: ProviderSet) -> TestServer {
        let state = test_state(config, providers).await;
        TestServer::new(routes::router(state)).unwrap()
    }

    async fn server() -> TestServer {
        server_with(test_config()).await
    }

    #[tokio::test]
    async fn test_extract_toc_then_cache_hit() {
        let server = server().await;

        let first = server.post("/extract-toc").bytes(PDF.into()).await;
        first.assert_status_ok();
        let body = first.json::<Value>();
        assert_eq!(body["ok"], true);
        assert_eq!(body["kind"], "toc");
        assert_eq!(body["cacheHit"], false);
        assert_eq!(body["data"]["entries"][2]["title"], "Results");
        assert_eq!(body["data"]["entries"][2]["level"], 2);
        assert_eq!(body["provenance"]["provider"], "mock-toc");

        let second = server.post("/extract-toc").bytes(PDF.into()).await;
        let cached = second.json::<Value>();
        assert_eq!(cached["cacheHit"], true);
        assert_eq!(cached["data"], body["data"]);
        assert_eq!(cached["provenance"]["fingerprint"], body["provenance"]["fingerprint"]);
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let server = server().await;
        let form = MultipartForm::new()
            .add_text("note", "ignored")
            .add_part("file", Part::bytes(PDF.to_vec()).file_name("report.pdf"));

        let response = server.post("/extract-toc").multipart(form).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["kind"], "toc");
    }

    #[tokio::test]
    async fn test_multipart_without_file_field() {
        let server = server().await;
        let form = MultipartForm::new().add_text("note", "no document here");

        let response = server.post("/extract-toc").multipart(form).await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<Value>()["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_wrong_media_type_is_unprocessable() {
        let server = server().await;
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\0".to_vec();

        let response = server.post("/extract-toc").bytes(png.into()).await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body = response.json::<Value>();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_rate_limited_chart() {
        let server = server().await;
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\0".to_vec();

        let response = server.post("/analyze-graph").bytes(png.into()).await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("retry-after"), "7");
        assert_eq!(response.json::<Value>()["retryAfterSecs"], 7);
    }

    #[tokio::test]
    async fn test_unavailable_sheet_provider_hides_detail() {
        let server = server().await;

        let response = server.post("/parse-sheet").bytes(PDF.into()).await;
        response.assert_status(StatusCode::BAD_GATEWAY);
        let body = response.json::<Value>();
        assert_eq!(body["error"], "provider_unavailable");
        assert!(!body["message"].as_str().unwrap().contains("upstream"));
    }

    #[tokio::test]
    async fn test_unrecognized_provider_body_is_bad_gateway() {
        let providers = ProviderSet::new(
            Arc::new(MockProvider::new(
                crate::document::ExtractionKind::Toc,
                json!({ "status": "ok" }),
            )),
            Arc::new(MockProvider::new(crate::document::ExtractionKind::Chart, json!({}))),
            Arc::new(MockProvider::new(crate::document::ExtractionKind::Spreadsheet, json!({}))),
        );
        let server = server_over(test_config(), providers).await;

        let response = server.post("/extract-toc").bytes(PDF.into()).await;
        response.assert_status(StatusCode::BAD_GATEWAY);
        let body = response.json::<Value>();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "normalization_error");
    }

    #[tokio::test]
    async fn test_body_limit() {
        let mut config = test_config();
        config.server.max_upload_bytes = 16;
        let server = server_with(config).await;

        let response = server.post("/extract-toc").bytes(vec![b'%'; 64].into()).await;
        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }
}
