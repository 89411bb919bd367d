//! Document catalog operations

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::document::{Document, ExtractionKind, Fingerprint};
use crate::error::Result;

/// Catalog record: the last upload of a filename for one extraction kind
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub kind: String,
    pub fingerprint: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub uploaded_at: String,
}

/// Document catalog repository
pub struct DocumentRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DocumentRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fingerprint last recorded for `filename` and `kind`
    pub async fn current_fingerprint(
        &self,
        filename: &str,
        kind: ExtractionKind,
    ) -> Result<Option<String>> {
        let fingerprint = sqlx::query_scalar::<_, String>(
            "SELECT fingerprint FROM documents WHERE filename = ? AND kind = ?",
        )
        .bind(filename)
        .bind(kind.as_str())
        .fetch_optional(self.pool)
        .await?;

        Ok(fingerprint)
    }

    /// Record an upload. Returns the fingerprint it replaced when the same
    /// filename previously had different content.
    pub async fn record(
        &self,
        filename: &str,
        kind: ExtractionKind,
        fingerprint: &Fingerprint,
        document: &Document,
    ) -> Result<Option<Fingerprint>> {
        let previous = self.current_fingerprint(filename, kind).await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, kind, fingerprint, media_type, size_bytes, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (filename, kind) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                media_type = excluded.media_type,
                size_bytes = excluded.size_bytes,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(filename)
        .bind(kind.as_str())
        .bind(fingerprint.as_str())
        .bind(document.media_type().mime())
        .bind(document.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool)
        .await?;

        // A row that no longer parses is simply replaced
        Ok(previous
            .filter(|previous| previous != fingerprint.as_str())
            .and_then(|previous| previous.parse().ok()))
    }

    /// Catalog entries, most recent first
    pub async fn list(&self, kind: Option<ExtractionKind>) -> Result<Vec<DocumentRecord>> {
        let documents = sqlx::query_as::<_, DocumentRecord>(
            r#"
            SELECT id, filename, kind, fingerprint, media_type, size_bytes, uploaded_at
            FROM documents
            WHERE ? IS NULL OR kind = ?
            ORDER BY uploaded_at DESC, filename ASC
            "#,
        )
        .bind(kind.map(|k| k.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(self.pool)
        .await?;

        Ok(documents)
    }
}
