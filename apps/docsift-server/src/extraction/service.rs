//! Extraction orchestrator
//!
//! Drives one request through
//! `Received -> CacheCheck -> (CacheHit | CacheMiss -> Extracting -> Normalizing -> CacheWrite) -> Done`,
//! with `Failed` reachable from every stage.
//!
//! Concurrent requests for the same fingerprint share one computation. The
//! in-flight table only holds weak handles, so the provider call is dropped
//! as soon as the last waiting caller goes away.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use tracing::Instrument;

use super::error::ExtractError;
use super::retry::{call_with_retry, RetryPolicy};
use super::types::ExtractionResult;
use crate::config::Config;
use crate::db::DocumentRepository;
use crate::document::{Document, ExtractionKind, Fingerprint};
use crate::normalize::normalize;
use crate::provider::{ProviderOptions, ProviderSet};
use crate::store::{CacheError, FingerprintStore, StoreStats};

type ExtractionFuture = BoxFuture<'static, Result<ExtractionResult, ExtractError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    CacheCheck,
    CacheHit,
    CacheMiss,
    Extracting,
    Normalizing,
    CacheWrite,
    Done,
    Failed,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::CacheCheck => "cache_check",
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::Extracting => "extracting",
            Self::Normalizing => "normalizing",
            Self::CacheWrite => "cache_write",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

fn enter(stage: Stage) {
    tracing::debug!(stage = stage.as_str(), "Extraction stage");
}

/// Tunables taken from [`Config`]
#[derive(Debug, Clone, Copy)]
pub struct ExtractionSettings {
    pub retry: RetryPolicy,
    /// Bound on each provider attempt
    pub provider_timeout: Duration,
    /// Cache entry lifetime; `None` keeps entries until invalidated
    pub ttl: Option<Duration>,
}

impl ExtractionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            provider_timeout: config.providers.timeout(),
            ttl: config.cache.ttl(),
        }
    }
}

/// One extraction request
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub document: Document,
    pub kind: ExtractionKind,
    pub options: ProviderOptions,
    /// Skip the cache lookup (the fresh result is still written back)
    pub refresh: bool,
}

impl ExtractionRequest {
    pub fn new(document: Document, kind: ExtractionKind) -> Self {
        Self {
            document,
            kind,
            options: ProviderOptions::default(),
            refresh: false,
        }
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn refreshing(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

struct InFlight {
    generation: u64,
    handle: WeakShared<ExtractionFuture>,
}

struct Inner {
    providers: ProviderSet,
    store: Arc<dyn FingerprintStore>,
    catalog: Option<SqlitePool>,
    settings: ExtractionSettings,
    in_flight: Mutex<HashMap<Fingerprint, InFlight>>,
    next_generation: AtomicU64,
}

/// Cache-aware, coalescing front end over the provider set
#[derive(Clone)]
pub struct ExtractionService {
    inner: Arc<Inner>,
}

impl ExtractionService {
    /// `catalog`, when given, records uploads by filename and invalidates the
    /// previous result when a filename comes back with different bytes.
    pub fn new(
        providers: ProviderSet,
        store: Arc<dyn FingerprintStore>,
        settings: ExtractionSettings,
        catalog: Option<SqlitePool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                providers,
                store,
                catalog,
                settings,
                in_flight: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        &self.inner.store
    }

    pub async fn stats(&self) -> Result<StoreStats, CacheError> {
        self.inner.store.stats().await
    }

    /// Drop the cached result for a fingerprint
    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        let removed = self.inner.store.invalidate(fingerprint).await?;
        tracing::info!(fingerprint = %fingerprint.short(), removed, "Cache entry invalidated");
        Ok(removed)
    }

    pub async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult, ExtractError> {
        let fingerprint = request.document.fingerprint(request.kind);
        let span = tracing::info_span!(
            "extract",
            kind = %request.kind,
            fingerprint = %fingerprint.short()
        );

        let outcome = self.run(request, fingerprint).instrument(span.clone()).await;
        span.in_scope(|| match &outcome {
            Ok(result) => {
                enter(Stage::Done);
                tracing::info!(
                    provider = %result.provenance.provider,
                    cache_hit = result.cache_hit(),
                    gaps = result.gaps.len(),
                    "Extraction complete"
                );
            }
            Err(err) => {
                enter(Stage::Failed);
                tracing::warn!(kind = err.kind.code(), "Extraction failed: {}", err.message);
            }
        });
        outcome
    }

    async fn run(
        &self,
        request: ExtractionRequest,
        fingerprint: Fingerprint,
    ) -> Result<ExtractionResult, ExtractError> {
        let ExtractionRequest {
            document,
            kind,
            options,
            refresh,
        } = request;

        enter(Stage::Received);
        if document.is_empty() {
            return Err(ExtractError::invalid_input("The uploaded document is empty"));
        }
        if !kind.accepts(document.media_type()) {
            return Err(ExtractError::invalid_input(format!(
                "{} documents are not supported for {} extraction",
                document.media_type().mime(),
                kind
            )));
        }

        let cached = if refresh {
            None
        } else {
            self.lookup_cached(&fingerprint).await
        };
        let result = match cached {
            Some(result) => result,
            None => {
                self.join_or_start(fingerprint.clone(), kind, document.clone(), options)
                    .await?
            }
        };

        // Only a finished result may replace the catalogued content
        self.record_upload(&document, kind, &fingerprint).await;
        Ok(result)
    }

    async fn lookup_cached(&self, fingerprint: &Fingerprint) -> Option<ExtractionResult> {
        enter(Stage::CacheCheck);
        match self.inner.store.lookup(fingerprint).await {
            Ok(Some(result)) => {
                enter(Stage::CacheHit);
                Some(result)
            }
            Ok(None) => {
                enter(Stage::CacheMiss);
                None
            }
            Err(e) => {
                tracing::warn!("Cache lookup failed, treating as miss: {}", e);
                enter(Stage::CacheMiss);
                None
            }
        }
    }

    /// Attach to the running computation for `fingerprint`, or start one
    fn join_or_start(
        &self,
        fingerprint: Fingerprint,
        kind: ExtractionKind,
        document: Document,
        options: ProviderOptions,
    ) -> Waiter {
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(entry) = in_flight.get(&fingerprint) {
            if let Some(flight) = entry.handle.upgrade() {
                tracing::debug!("Joining in-flight extraction");
                return Waiter {
                    inner: self.inner.clone(),
                    generation: entry.generation,
                    fingerprint,
                    flight: Some(flight),
                };
            }
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let key = fingerprint.clone();
        let flight: Shared<ExtractionFuture> = async move {
            inner.compute(kind, &document, &options, &key).await
        }
        .instrument(tracing::Span::current())
        .boxed()
        .shared();

        if let Some(handle) = flight.downgrade() {
            in_flight.insert(fingerprint.clone(), InFlight { generation, handle });
        }

        Waiter {
            inner: self.inner.clone(),
            generation,
            fingerprint,
            flight: Some(flight),
        }
    }

    async fn record_upload(&self, document: &Document, kind: ExtractionKind, fingerprint: &Fingerprint) {
        let (Some(pool), Some(filename)) = (&self.inner.catalog, document.filename()) else {
            return;
        };

        match DocumentRepository::new(pool)
            .record(filename, kind, fingerprint, document)
            .await
        {
            Ok(Some(replaced)) => {
                tracing::info!(
                    filename,
                    replaced = %replaced.short(),
                    "Document content changed, invalidating previous result"
                );
                if let Err(e) = self.inner.store.invalidate(&replaced).await {
                    tracing::warn!("Failed to invalidate replaced result: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to record document in catalog: {}", e),
        }
    }
}

impl Inner {
    async fn compute(
        &self,
        kind: ExtractionKind,
        document: &Document,
        options: &ProviderOptions,
        fingerprint: &Fingerprint,
    ) -> Result<ExtractionResult, ExtractError> {
        let provider = self.providers.get(kind);

        enter(Stage::Extracting);
        let raw = call_with_retry(self.settings.retry, self.settings.provider_timeout, move |attempt| {
            tracing::debug!(attempt, provider = provider.name(), "Calling provider");
            provider.extract(document, options)
        })
        .await?;

        if raw.kind != kind {
            return Err(ExtractError::internal(format!(
                "provider {} answered a {} request with {}",
                raw.provider, kind, raw.kind
            )));
        }

        enter(Stage::Normalizing);
        let result = normalize(&raw, fingerprint)?;
        if result.is_degraded() {
            tracing::debug!(gaps = ?result.gaps, "Normalized with gaps");
        }

        enter(Stage::CacheWrite);
        if let Err(e) = self.store.put(fingerprint, &result, self.settings.ttl).await {
            tracing::warn!("Cache write failed, result not stored: {}", e);
        }

        Ok(result)
    }
}

/// A caller's handle on a shared computation. Dropping the last one drops
/// the computation and clears its in-flight entry.
struct Waiter {
    inner: Arc<Inner>,
    generation: u64,
    fingerprint: Fingerprint,
    flight: Option<Shared<ExtractionFuture>>,
}

impl Future for Waiter {
    type Output = Result<ExtractionResult, ExtractError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.flight.as_mut() {
            Some(flight) => Pin::new(flight).poll(cx),
            None => Poll::Ready(Err(ExtractError::internal("extraction polled after completion"))),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // Release our strong handle before checking whether anyone else holds one
        drop(self.flight.take());

        let mut in_flight = self.inner.in_flight.lock();
        let finished = in_flight.get(&self.fingerprint).is_some_and(|entry| {
            entry.generation == self.generation && entry.handle.upgrade().is_none()
        });
        if finished {
            in_flight.remove(&self.fingerprint);
        }
    }
}
