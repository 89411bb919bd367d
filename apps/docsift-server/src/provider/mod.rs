//! Extraction providers
//!
//! One adapter per extraction kind, all behind [`ExtractionProvider`]:
//!
//! - [`PdfTocProvider`]: local outline / contents-page reader (lopdf)
//! - [`AzureVisionProvider`]: chart analysis through Azure OpenAI vision
//! - [`SpreadsheetProvider`]: native workbooks read locally, scanned tables
//!   through Azure Document Intelligence `prebuilt-layout`
//!
//! Adapters never retry. They translate provider failures into the
//! [`ProviderError`] categories and leave retry policy to the orchestrator.

mod chart;
mod http;
mod pdf;
mod sheet;
mod toc;
mod workbook;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProvidersConfig;
use crate::document::{Document, ExtractionKind};

pub use chart::AzureVisionProvider;
pub use sheet::{AzureLayoutClient, SpreadsheetProvider};
pub use toc::{find_toc_page_range, is_toc_like_page, parse_toc_line, PdfTocProvider};

/// Per-request hints for providers. Never part of the fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Language hint (e.g. "en", "de")
    #[serde(default)]
    pub language: Option<String>,
}

/// Provider response before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProviderResponse {
    /// Provider that produced the body (recorded in provenance)
    pub provider: String,
    pub kind: ExtractionKind,
    pub received_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

impl RawProviderResponse {
    pub fn new(provider: &str, kind: ExtractionKind, body: serde_json::Value) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            received_at: Utc::now(),
            body,
        }
    }
}

/// Provider failure categories
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Malformed or unsupported document
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Network, auth or server-side failure
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Failures worth another attempt
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Extraction capability implemented by every adapter
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// The extraction kind this adapter serves
    fn kind(&self) -> ExtractionKind;

    /// Run the extraction and return the provider's raw answer
    async fn extract(
        &self,
        document: &Document,
        options: &ProviderOptions,
    ) -> Result<RawProviderResponse, ProviderError>;
}

/// The closed set of adapters, one per kind
#[derive(Clone)]
pub struct ProviderSet {
    toc: Arc<dyn ExtractionProvider>,
    chart: Arc<dyn ExtractionProvider>,
    spreadsheet: Arc<dyn ExtractionProvider>,
}

impl ProviderSet {
    pub fn new(
        toc: Arc<dyn ExtractionProvider>,
        chart: Arc<dyn ExtractionProvider>,
        spreadsheet: Arc<dyn ExtractionProvider>,
    ) -> Self {
        debug_assert_eq!(toc.kind(), ExtractionKind::Toc);
        debug_assert_eq!(chart.kind(), ExtractionKind::Chart);
        debug_assert_eq!(spreadsheet.kind(), ExtractionKind::Spreadsheet);
        Self {
            toc,
            chart,
            spreadsheet,
        }
    }

    /// Build the production adapters from configuration
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let timeout = config.timeout();
        let client = http::build_client(timeout)?;

        let toc = PdfTocProvider::new(config.toc.max_scan_pages, config.toc.min_toc_pages);
        let chart = AzureVisionProvider::new(client.clone(), &config.chart, timeout);
        let layout = AzureLayoutClient::new(client, &config.layout, timeout);

        if !chart.is_configured() {
            tracing::warn!("Chart provider credentials missing; /analyze-graph will report provider_unavailable");
        }
        if !layout.is_configured() {
            tracing::warn!("Layout provider credentials missing; scanned sheets will report provider_unavailable");
        }

        Ok(Self::new(
            Arc::new(toc),
            Arc::new(chart),
            Arc::new(SpreadsheetProvider::new(layout)),
        ))
    }

    pub fn get(&self, kind: ExtractionKind) -> &Arc<dyn ExtractionProvider> {
        match kind {
            ExtractionKind::Toc => &self.toc,
            ExtractionKind::Chart => &self.chart,
            ExtractionKind::Spreadsheet => &self.spreadsheet,
        }
    }
}
