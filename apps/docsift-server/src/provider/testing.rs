//! Deterministic provider double for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ExtractionProvider, ProviderError, ProviderOptions, RawProviderResponse};
use crate::document::{Document, ExtractionKind};

/// Mock provider: replays scripted outcomes, then repeats `fallback`
pub struct MockProvider {
    name: String,
    kind: ExtractionKind,
    fallback: Result<serde_json::Value, ProviderError>,
    script: Mutex<VecDeque<Result<serde_json::Value, ProviderError>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl MockProvider {
    pub fn new(kind: ExtractionKind, body: serde_json::Value) -> Self {
        Self::with_result(kind, Ok(body))
    }

    pub fn failing(kind: ExtractionKind, error: ProviderError) -> Self {
        Self::with_result(kind, Err(error))
    }

    fn with_result(kind: ExtractionKind, fallback: Result<serde_json::Value, ProviderError>) -> Self {
        Self {
            name: format!("mock-{}", kind),
            kind,
            fallback,
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Outcomes returned, in order, before falling back
    pub fn with_script(self, script: Vec<Result<serde_json::Value, ProviderError>>) -> Self {
        *self.script.lock() = script.into();
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared call counter, readable after the provider moved into a service
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Counts calls dropped before they finished
    pub fn cancel_counter(&self) -> Arc<AtomicUsize> {
        self.cancelled.clone()
    }
}

struct CancelGuard {
    counter: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ExtractionProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ExtractionKind {
        self.kind
    }

    async fn extract(
        &self,
        _document: &Document,
        _options: &ProviderOptions,
    ) -> Result<RawProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = CancelGuard {
            counter: self.cancelled.clone(),
            armed: true,
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        guard.armed = false;

        outcome.map(|body| RawProviderResponse::new(&self.name, self.kind, body))
    }
}
