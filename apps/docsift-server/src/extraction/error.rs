//! Extraction failures as seen by callers
//!
//! Provider and normalizer errors are folded into one clonable
//! [`ExtractError`] so coalesced requests can share a failure. Messages are
//! written here, never copied from provider responses.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::normalize::NormalizeError;
use crate::provider::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ProviderUnavailable,
    Timeout,
    RateLimited,
    NormalizationError,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::NormalizationError => "normalization_error",
            Self::Internal => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NormalizationError => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Terminal failure of an extraction request
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {}", .kind.code(), .message)]
pub struct ExtractError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl ExtractError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<ProviderError> for ExtractError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidInput(message) => Self::invalid_input(message),
            ProviderError::Unavailable(_) => Self::new(
                ErrorKind::ProviderUnavailable,
                "The extraction provider is unavailable",
            ),
            ProviderError::RateLimited { retry_after } => Self {
                kind: ErrorKind::RateLimited,
                message: "The extraction provider is rate limiting requests".to_string(),
                retry_after,
            },
            ProviderError::Timeout(after) => Self::new(
                ErrorKind::Timeout,
                format!("The extraction provider did not answer within {}s", after.as_secs()),
            ),
        }
    }
}

impl From<NormalizeError> for ExtractError {
    fn from(err: NormalizeError) -> Self {
        Self::new(ErrorKind::NormalizationError, err.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    ok: bool,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind.code(), "Extraction failed: {}", self.message);
        } else {
            tracing::warn!(kind = self.kind.code(), "Extraction rejected: {}", self.message);
        }

        let retry_after_secs = self.retry_after.map(|d| d.as_secs().max(1));
        let body = Json(ErrorResponse {
            ok: false,
            error: self.kind.code(),
            message: self.message,
            retry_after_secs,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
