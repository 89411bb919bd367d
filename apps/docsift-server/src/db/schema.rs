//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Normalized extraction results keyed by fingerprint
CREATE TABLE IF NOT EXISTS extraction_cache (
    fingerprint TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    provider TEXT NOT NULL,
    result TEXT NOT NULL,
    created_at TEXT NOT NULL,
    -- Unix milliseconds; NULL never expires
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_extraction_cache_expires ON extraction_cache(expires_at);

-- Last upload per filename and kind
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    kind TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    media_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    uploaded_at TEXT NOT NULL,
    UNIQUE (filename, kind)
);

CREATE INDEX IF NOT EXISTS idx_documents_kind ON documents(kind, uploaded_at);
"#;
