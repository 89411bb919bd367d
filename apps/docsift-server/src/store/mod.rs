//! Fingerprint store
//!
//! Maps fingerprints to normalized extraction results. Two backends share
//! the [`FingerprintStore`] trait: SQLite (persistent, the default) and a
//! bounded in-memory LRU.
//!
//! Entries past their TTL are invisible to `lookup` immediately and are
//! physically removed by `purge_expired`, which [`spawn_sweeper`] runs on an
//! interval.

mod memory;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::CacheBackend;
use crate::document::Fingerprint;
use crate::extraction::ExtractionResult;

pub use memory::MemoryFingerprintStore;
pub use sqlite::SqliteFingerprintStore;

/// Store failures. The orchestrator treats every variant as a cache miss.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Snapshot for `GET /cache/stats`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub backend: CacheBackend,
    /// Live (unexpired) entries
    pub entries: u64,
    pub capacity: Option<usize>,
}

#[async_trait]
pub trait FingerprintStore: Send + Sync {
    fn backend(&self) -> CacheBackend;

    /// Cached result for a fingerprint, if present and unexpired
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ExtractionResult>, CacheError>;

    /// Insert or overwrite the entry for a fingerprint
    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: &ExtractionResult,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Remove an entry. Returns whether one existed.
    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<StoreStats, CacheError>;
}

/// Periodically purge expired entries
pub fn spawn_sweeper(store: Arc<dyn FingerprintStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));

        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired cache entries"),
                Err(e) => tracing::warn!("Cache sweep failed: {}", e),
            }
        }
    })
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Expiry timestamp for a TTL starting now
pub(crate) fn expiry_millis(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_millis() {
        assert_eq!(expiry_millis(None), None);
        let now = now_millis();
        let expiry = expiry_millis(Some(Duration::from_secs(60))).unwrap();
        assert!(expiry >= now + 60_000);
        assert_eq!(expiry_millis(Some(Duration::MAX)), Some(i64::MAX));
    }
}
