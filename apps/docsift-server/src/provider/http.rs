//! HTTP plumbing shared by the remote adapters

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use super::ProviderError;

/// Longest provider error body kept in logs
const MAX_LOGGED_BODY: usize = 512;

pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("Failed to build HTTP client: {}", e)))
}

/// Map a non-success provider status to a failure category
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after: parse_retry_after(headers, Utc::now()),
        },
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::InvalidInput(format!(
            "The provider rejected the document (HTTP {})",
            status.as_u16()
        )),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Unavailable(format!("provider timed out upstream (HTTP {})", status))
        }
        _ => ProviderError::Unavailable(format!("provider returned HTTP {}", status)),
    }
}

/// Map a transport failure to a failure category
pub fn classify_transport(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Unavailable(format!("request failed: {}", err.without_url()))
    }
}

/// Retry-After as either delay-seconds or an HTTP date
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}

/// Consume a failed response, log its body, and classify it
pub async fn reject(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_LOGGED_BODY).collect();

    tracing::warn!(
        provider = provider,
        status = status.as_u16(),
        "Provider returned an error: {}",
        body
    );

    classify_status(status, &headers)
}
