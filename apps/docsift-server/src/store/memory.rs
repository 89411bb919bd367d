use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

use super::{CacheError, FingerprintStore, StoreStats};
use crate::config::CacheBackend;
use crate::document::Fingerprint;
use crate::extraction::{ExtractionResult, Freshness};

struct Entry {
    result: ExtractionResult,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Bounded in-process store; least recently used entries go first
pub struct MemoryFingerprintStore {
    entries: Mutex<LruCache<Fingerprint, Entry>>,
    capacity: usize,
}

impl MemoryFingerprintStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
        }
    }
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Memory
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ExtractionResult>, CacheError> {
        let mut entries = self.entries.lock();

        let expired = match entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                let mut result = entry.result.clone();
                result.freshness = Freshness::Cached;
                return Ok(Some(result));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(fingerprint);
        }
        Ok(None)
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: &ExtractionResult,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries.lock().put(
            fingerprint.clone(),
            Entry {
                result: result.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        Ok(self.entries.lock().pop(fingerprint).is_some())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();
        for fingerprint in &expired {
            entries.pop(fingerprint);
        }
        Ok(expired.len() as u64)
    }

    async fn stats(&self) -> Result<StoreStats, CacheError> {
        let now = Instant::now();
        let live = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();

        Ok(StoreStats {
            backend: CacheBackend::Memory,
            entries: live as u64,
            capacity: Some(self.capacity),
        })
    }
}
