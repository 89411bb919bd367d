//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::{CacheBackend, Config};
use crate::extraction::{ExtractionService, ExtractionSettings};
use crate::provider::{ProviderError, ProviderSet};
use crate::store::{FingerprintStore, MemoryFingerprintStore, SqliteFingerprintStore};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize providers: {0}")]
    Providers(#[from] ProviderError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    extraction: ExtractionService,
}

impl AppState {
    /// Assemble state from already built parts
    pub fn new(config: Config, db: SqlitePool, extraction: ExtractionService) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                extraction,
            }),
        }
    }

    /// Build the production providers and the configured cache backend
    pub fn from_config(config: Config, db: SqlitePool) -> Result<Self, StateError> {
        let providers = ProviderSet::from_config(&config.providers)?;
        let store = build_store(&config, &db);
        let extraction = ExtractionService::new(
            providers,
            store,
            ExtractionSettings::from_config(&config),
            Some(db.clone()),
        );

        Ok(Self::new(config, db, extraction))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn extraction(&self) -> &ExtractionService {
        &self.inner.extraction
    }
}

fn build_store(config: &Config, db: &SqlitePool) -> Arc<dyn FingerprintStore> {
    match config.cache.backend {
        CacheBackend::Sqlite => Arc::new(SqliteFingerprintStore::new(db.clone())),
        CacheBackend::Memory => Arc::new(MemoryFingerprintStore::new(config.cache.memory_capacity)),
    }
}
