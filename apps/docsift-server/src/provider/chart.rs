//! Chart analysis through Azure OpenAI vision

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, ImageFormat, ImageReader};
use serde_json::json;

use super::{http, pdf, ExtractionProvider, ProviderError, ProviderOptions, RawProviderResponse};
use crate::config::ChartProviderConfig;
use crate::document::{Document, ExtractionKind, MediaType};

pub const PROVIDER_NAME: &str = "azure-openai-vision";

const CHART_PROMPT: &str = "Extract data from this chart as JSON. Include: title, axes labels, \
data points (value, label). Return ONLY valid JSON.";

/// Longest side sent to the model
const MAX_IMAGE_SIDE: u32 = 2048;
const MAX_TOKENS: u32 = 4096;

pub struct AzureVisionProvider {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    deployment: Option<String>,
    api_version: String,
    timeout: Duration,
}

impl AzureVisionProvider {
    pub fn new(client: reqwest::Client, config: &ChartProviderConfig, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone(),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some() && self.deployment.is_some()
    }

    fn url(&self) -> Option<String> {
        Some(format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.as_ref()?,
            self.deployment.as_ref()?,
            self.api_version
        ))
    }
}

/// Image bytes and MIME type as they will be sent
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedImage {
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Pick the image to send: the upload itself when the model accepts it,
/// a PNG re-encode when it is too large or in a format the model rejects,
/// or the embedded JPEG of a PDF's first page.
pub(crate) fn prepare_image(bytes: &[u8], media_type: MediaType) -> Result<PreparedImage, ProviderError> {
    if media_type == MediaType::Pdf {
        let doc = pdf::load(bytes)?;
        let jpeg = pdf::first_page_jpeg(&doc).ok_or_else(|| {
            ProviderError::InvalidInput("The PDF's first page has no embedded chart image".to_string())
        })?;
        return prepare_image(&jpeg, MediaType::Jpeg);
    }

    if !media_type.is_image() {
        return Err(ProviderError::InvalidInput(
            "Chart analysis needs an image or a PDF".to_string(),
        ));
    }

    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ProviderError::InvalidInput(format!("Unreadable image: {}", e)))?
        .into_dimensions()
        .map_err(|e| ProviderError::InvalidInput(format!("Unreadable image: {}", e)))?;

    let accepted = matches!(
        media_type,
        MediaType::Png | MediaType::Jpeg | MediaType::Gif | MediaType::Webp
    );
    if accepted && width.max(height) <= MAX_IMAGE_SIDE {
        return Ok(PreparedImage {
            mime: media_type.mime(),
            bytes: bytes.to_vec(),
        });
    }

    let mut img = image::load_from_memory(bytes)
        .map_err(|e| ProviderError::InvalidInput(format!("Unreadable image: {}", e)))?;
    if width.max(height) > MAX_IMAGE_SIDE {
        tracing::debug!(width, height, "Downscaling chart image");
        img = img.resize(MAX_IMAGE_SIDE, MAX_IMAGE_SIDE, FilterType::Triangle);
    }

    let mut output = Vec::new();
    img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| ProviderError::InvalidInput(format!("Failed to encode image: {}", e)))?;

    Ok(PreparedImage {
        mime: MediaType::Png.mime(),
        bytes: output,
    })
}

fn request_body(image: &PreparedImage, language: Option<&str>) -> serde_json::Value {
    let prompt = match language {
        Some(lang) => format!("{} Write labels in the language \"{}\".", CHART_PROMPT, lang),
        None => CHART_PROMPT.to_string(),
    };
    let data_url = format!("data:{};base64,{}", image.mime, STANDARD.encode(&image.bytes));

    json!({
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": data_url } }
            ]
        }],
        "max_tokens": MAX_TOKENS,
        "temperature": 0
    })
}

#[async_trait]
impl ExtractionProvider for AzureVisionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ExtractionKind {
        ExtractionKind::Chart
    }

    async fn extract(
        &self,
        document: &Document,
        options: &ProviderOptions,
    ) -> Result<RawProviderResponse, ProviderError> {
        let (Some(url), Some(api_key)) = (self.url(), self.api_key.as_deref()) else {
            return Err(ProviderError::Unavailable(
                "chart provider is not configured".to_string(),
            ));
        };

        let bytes = document.bytes().clone();
        let media_type = document.media_type();
        let image = tokio::task::spawn_blocking(move || prepare_image(&bytes, media_type))
            .await
            .map_err(|e| ProviderError::Unavailable(format!("image task failed: {}", e)))??;

        tracing::debug!(mime = image.mime, size = image.bytes.len(), "Sending chart to vision model");

        let response = self
            .client
            .post(url)
            .header("api-key", api_key)
            .json(&request_body(&image, options.language.as_deref()))
            .send()
            .await
            .map_err(|e| http::classify_transport(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(http::reject(PROVIDER_NAME, response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| http::classify_transport(e, self.timeout))?;

        Ok(RawProviderResponse::new(PROVIDER_NAME, ExtractionKind::Chart, body))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
        let mut output = Vec::new();
        img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .unwrap();
        output
    }

    /// Serve `app` on an ephemeral port and return its base URL
    pub(crate) async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn provider(endpoint: Option<String>) -> AzureVisionProvider {
        let config = ChartProviderConfig {
            endpoint,
            api_key: Some("test-key".to_string()),
            deployment: Some("gpt-4o".to_string()),
            api_version: "2023-12-01-preview".to_string(),
        };
        let timeout = Duration::from_secs(5);
        AzureVisionProvider::new(http::build_client(timeout).unwrap(), &config, timeout)
    }

    #[test]
    fn test_small_png_is_sent_as_is() {
        let bytes = png(40, 20);
        let prepared = prepare_image(&bytes, MediaType::Png).unwrap();
        assert_eq!(prepared.mime, "image/png");
        assert_eq!(prepared.bytes, bytes);
    }

    #[test]
    fn test_large_image_is_downscaled() {
        let prepared = prepare_image(&png(4096, 100), MediaType::Png).unwrap();
        let img = image::load_from_memory(&prepared.bytes).unwrap();
        assert_eq!(img.width(), MAX_IMAGE_SIDE);
        assert!(img.height() <= 100);
    }

    #[test]
    fn test_pdf_without_image_is_invalid() {
        let bytes = pdf::tests::pdf_with_outline();
        let result = prepare_image(&bytes, MediaType::Pdf);
        assert!(matches!(result, Err(ProviderError::InvalidInput(_))));
    }

    #[test]
    fn test_request_body_carries_data_url_and_hint() {
        let image = PreparedImage {
            mime: "image/png",
            bytes: vec![1, 2, 3],
        };
        let body = request_body(&image, Some("de"));
        let content = &body["messages"][0]["content"];
        assert!(content[0]["text"].as_str().unwrap().contains("\"de\""));
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert_eq!(body["temperature"], 0);
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_unavailable() {
        let document = Document::new(png(10, 10), None);
        let result = provider(None)
            .extract(&document, &ProviderOptions::default())
            .await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_extract_returns_completion_envelope() {
        let app = Router::new().route(
            "/openai/deployments/gpt-4o/chat/completions",
            post(|| async {
                Json(json!({
                    "choices": [{ "message": { "content": "{\"title\": \"Sales\"}" } }]
                }))
            }),
        );
        let base = serve(app).await;

        let document = Document::new(png(10, 10), None);
        let raw = provider(Some(base))
            .extract(&document, &ProviderOptions::default())
            .await
            .unwrap();

        assert_eq!(raw.provider, PROVIDER_NAME);
        assert_eq!(raw.kind, ExtractionKind::Chart);
        assert!(raw.body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap()
            .contains("Sales"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_classified() {
        let app = Router::new().route(
            "/openai/deployments/gpt-4o/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down") }),
        );
        let base = serve(app).await;

        let document = Document::new(png(10, 10), None);
        let result = provider(Some(base))
            .extract(&document, &ProviderOptions::default())
            .await;

        assert_eq!(
            result.unwrap_err(),
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }
}
