use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{expiry_millis, now_millis, CacheError, FingerprintStore, StoreStats};
use crate::config::CacheBackend;
use crate::document::Fingerprint;
use crate::extraction::{ExtractionResult, Freshness};

/// Persistent store over the `extraction_cache` table
#[derive(Clone)]
pub struct SqliteFingerprintStore {
    pool: SqlitePool,
}

impl SqliteFingerprintStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FingerprintStore for SqliteFingerprintStore {
    fn backend(&self) -> CacheBackend {
        CacheBackend::Sqlite
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ExtractionResult>, CacheError> {
        let stored = sqlx::query_scalar::<_, String>(
            r#"
            SELECT result FROM extraction_cache
            WHERE fingerprint = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;

        let Some(stored) = stored else {
            return Ok(None);
        };

        let mut result: ExtractionResult =
            serde_json::from_str(&stored).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        result.freshness = Freshness::Cached;
        Ok(Some(result))
    }

    async fn put(
        &self,
        fingerprint: &Fingerprint,
        result: &ExtractionResult,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let serialized =
            serde_json::to_string(result).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO extraction_cache (fingerprint, kind, provider, result, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (fingerprint) DO UPDATE SET
                kind = excluded.kind,
                provider = excluded.provider,
                result = excluded.result,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(result.kind().as_str())
        .bind(&result.provenance.provider)
        .bind(serialized)
        .bind(Utc::now().to_rfc3339())
        .bind(expiry_millis(ttl))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        let deleted = sqlx::query("DELETE FROM extraction_cache WHERE fingerprint = ?")
            .bind(fingerprint.as_str())
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let deleted = sqlx::query(
            "DELETE FROM extraction_cache WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(deleted.rows_affected())
    }

    async fn stats(&self) -> Result<StoreStats, CacheError> {
        let entries = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM extraction_cache WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            backend: CacheBackend::Sqlite,
            entries: entries.max(0) as u64,
            capacity: None,
        })
    }
}
