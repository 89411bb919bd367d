//! Spreadsheet extraction
//!
//! Native workbooks (xlsx, csv) are read locally. Scanned tables in PDFs and
//! images go through Azure Document Intelligence `prebuilt-layout`: the
//! document is submitted once, then the returned `Operation-Location` is
//! polled until the analysis settles.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::Deserialize;

use super::{http, workbook, ExtractionProvider, ProviderError, ProviderOptions, RawProviderResponse};
use crate::config::LayoutProviderConfig;
use crate::document::{Document, ExtractionKind, MediaType};

pub const LAYOUT_PROVIDER_NAME: &str = "azure-document-intelligence";

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";

/// Client for the `prebuilt-layout` model
pub struct AzureLayoutClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    api_version: String,
    poll_interval: Duration,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
}

impl AzureLayoutClient {
    pub fn new(client: reqwest::Client, config: &LayoutProviderConfig, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    /// Submit a document and wait for the layout analysis
    pub async fn analyze(
        &self,
        document: &Document,
        options: &ProviderOptions,
    ) -> Result<serde_json::Value, ProviderError> {
        let (Some(endpoint), Some(api_key)) = (self.endpoint.as_deref(), self.api_key.as_deref())
        else {
            return Err(ProviderError::Unavailable(
                "layout provider is not configured".to_string(),
            ));
        };

        let mut url = format!(
            "{}/formrecognizer/documentModels/prebuilt-layout:analyze?api-version={}",
            endpoint, self.api_version
        );
        if let Some(lang) = options.language.as_deref() {
            url.push_str("&locale=");
            url.push_str(lang);
        }

        let response = self
            .client
            .post(&url)
            .header(SUBSCRIPTION_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, document.media_type().mime())
            .body(document.bytes().clone())
            .send()
            .await
            .map_err(|e| http::classify_transport(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(http::reject(LAYOUT_PROVIDER_NAME, response).await);
        }

        let operation = operation_location(response.headers()).ok_or_else(|| {
            ProviderError::Unavailable("analyze response had no Operation-Location".to_string())
        })?;
        tracing::debug!("Layout analysis submitted");

        tokio::time::timeout(self.timeout, self.poll(&operation, api_key))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
    }

    async fn poll(&self, operation: &str, api_key: &str) -> Result<serde_json::Value, ProviderError> {
        loop {
            let response = self
                .client
                .get(operation)
                .header(SUBSCRIPTION_KEY_HEADER, api_key)
                .send()
                .await
                .map_err(|e| http::classify_transport(e, self.timeout))?;

            if !response.status().is_success() {
                return Err(http::reject(LAYOUT_PROVIDER_NAME, response).await);
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| http::classify_transport(e, self.timeout))?;

            let status = serde_json::from_value::<OperationStatus>(body.clone())
                .map(|s| s.status)
                .unwrap_or_default();

            match status.as_str() {
                "succeeded" => return Ok(body),
                "failed" => return Err(failure(&body)),
                "notStarted" | "running" => {
                    tracing::trace!(status = %status, "Layout analysis pending");
                    tokio::time::sleep(self.poll_interval).await;
                }
                other => {
                    return Err(ProviderError::Unavailable(format!(
                        "unexpected analysis status {:?}",
                        other
                    )))
                }
            }
        }
    }
}

fn operation_location(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OPERATION_LOCATION_HEADER)?
        .to_str()
        .ok()
        .map(str::to_string)
}

/// A failed operation is the caller's fault when the service says the
/// document itself was bad
fn failure(body: &serde_json::Value) -> ProviderError {
    let code = body["error"]["code"].as_str().unwrap_or_default();
    tracing::warn!(code = code, "Layout analysis failed: {}", body["error"]["message"]);

    match code {
        "InvalidRequest" | "InvalidContent" | "InvalidContentLength" | "UnsupportedContent" => {
            ProviderError::InvalidInput("The provider could not read the document".to_string())
        }
        _ => ProviderError::Unavailable(format!("analysis failed ({})", code)),
    }
}

/// Spreadsheet adapter: local reader for workbooks, layout analysis for
/// everything else
pub struct SpreadsheetProvider {
    layout: AzureLayoutClient,
}

impl SpreadsheetProvider {
    pub fn new(layout: AzureLayoutClient) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl ExtractionProvider for SpreadsheetProvider {
    fn name(&self) -> &str {
        "spreadsheet"
    }

    fn kind(&self) -> ExtractionKind {
        ExtractionKind::Spreadsheet
    }

    async fn extract(
        &self,
        document: &Document,
        options: &ProviderOptions,
    ) -> Result<RawProviderResponse, ProviderError> {
        let media_type = document.media_type();

        if media_type.is_spreadsheet() {
            let bytes = document.bytes().clone();
            let body = tokio::task::spawn_blocking(move || workbook::read(&bytes, media_type))
                .await
                .map_err(|e| ProviderError::Unavailable(format!("workbook task failed: {}", e)))??;
            return Ok(RawProviderResponse::new(
                workbook::PROVIDER_NAME,
                ExtractionKind::Spreadsheet,
                body,
            ));
        }

        if media_type != MediaType::Pdf && !media_type.is_image() {
            return Err(ProviderError::InvalidInput(
                "Spreadsheet parsing needs a workbook, a PDF or an image".to_string(),
            ));
        }

        let body = self.layout.analyze(document, options).await?;
        Ok(RawProviderResponse::new(
            LAYOUT_PROVIDER_NAME,
            ExtractionKind::Spreadsheet,
            body,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use axum::{
        extract::State,
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    const PDF: &[u8] = b"%PDF-1.4\n%scanned table";

    fn client(endpoint: Option<String>, timeout: Duration) -> AzureLayoutClient {
        let config = LayoutProviderConfig {
            endpoint,
            api_key: Some("test-key".to_string()),
            api_version: "2023-07-31".to_string(),
            poll_interval_ms: 10,
        };
        AzureLayoutClient::new(http::build_client(timeout).unwrap(), &config, timeout)
    }

    /// Mock service: accepts the submission, reports `running` for the
    /// first `pending` polls, then `final_body`
    async fn mock_layout(pending: usize, final_body: serde_json::Value) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let polls = Arc::new(AtomicUsize::new(0));

        let operation = format!("{}/operations/1", base);
        let app = Router::new()
            .route(
                "/formrecognizer/documentModels/prebuilt-layout:analyze",
                post(move |headers: axum::http::HeaderMap| {
                    let operation = operation.clone();
                    async move {
                        assert_eq!(headers[SUBSCRIPTION_KEY_HEADER], "test-key");
                        (StatusCode::ACCEPTED, [(OPERATION_LOCATION_HEADER, operation)]).into_response()
                    }
                }),
            )
            .route(
                "/operations/1",
                get(move |State(polls): State<Arc<AtomicUsize>>| {
                    let final_body = final_body.clone();
                    async move {
                        if polls.fetch_add(1, Ordering::SeqCst) < pending {
                            Json(json!({ "status": "running" }))
                        } else {
                            Json(final_body)
                        }
                    }
                }),
            )
            .with_state(polls.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, polls)
    }

    #[tokio::test]
    async fn test_analyze_polls_until_succeeded() {
        let result = json!({
            "status": "succeeded",
            "analyzeResult": { "tables": [], "pages": [] }
        });
        let (base, polls) = mock_layout(2, result.clone()).await;

        let body = client(Some(base), Duration::from_secs(5))
            .analyze(&Document::new(PDF, None), &ProviderOptions::default())
            .await
            .unwrap();

        assert_eq!(body, result);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_analysis_with_bad_content_is_invalid_input() {
        let (base, _) = mock_layout(
            0,
            json!({
                "status": "failed",
                "error": { "code": "InvalidContent", "message": "corrupt" }
            }),
        )
        .await;

        let result = client(Some(base), Duration::from_secs(5))
            .analyze(&Document::new(PDF, None), &ProviderOptions::default())
            .await;

        assert!(matches!(result, Err(ProviderError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_polling_is_bounded_by_timeout() {
        let (base, _) = mock_layout(usize::MAX, json!({})).await;

        let result = client(Some(base), Duration::from_millis(200))
            .analyze(&Document::new(PDF, None), &ProviderOptions::default())
            .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_csv_is_read_locally() {
        let provider = SpreadsheetProvider::new(client(None, Duration::from_secs(1)));
        let document = Document::new(b"a,b\n1,2\n".to_vec(), Some("data.csv".to_string()));

        let raw = provider
            .extract(&document, &ProviderOptions::default())
            .await
            .unwrap();

        assert_eq!(raw.provider, workbook::PROVIDER_NAME);
        assert_eq!(raw.body["workbook"]["sheets"][0]["rows"][1][0], "1");
    }

    #[tokio::test]
    async fn test_scanned_sheet_without_credentials_is_unavailable() {
        let provider = SpreadsheetProvider::new(client(None, Duration::from_secs(1)));
        let result = provider
            .extract(&Document::new(PDF, None), &ProviderOptions::default())
            .await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }
}
