//! SQLite passage store.
//!
//! One table, `passages`, keyed by passage id. Metadata is stored as a JSON
//! object in a TEXT column.

use async_trait::async_trait;
use ragstream_core::error::RetrievalError;
use ragstream_core::retrieval::{Passage, PassageId, PassageStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub struct SqlitePassageStore {
    pool: SqlitePool,
}

impl SqlitePassageStore {
    /// Open (creating if missing) the store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, RetrievalError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| RetrievalError::Store(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| RetrievalError::Store(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite passage store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RetrievalError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), RetrievalError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS passages (
                passage_id  TEXT PRIMARY KEY NOT NULL,
                text        TEXT NOT NULL,
                metadata    TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Store(format!("passages table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Insert or replace a passage.
    pub async fn upsert(&self, passage: &Passage) -> Result<(), RetrievalError> {
        let metadata = serde_json::to_string(&passage.metadata)
            .map_err(|e| RetrievalError::Store(format!("Metadata serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO passages (passage_id, text, metadata)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(passage_id) DO UPDATE SET
                text = excluded.text,
                metadata = excluded.metadata
            "#,
        )
        .bind(passage.id.as_str())
        .bind(&passage.text)
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| RetrievalError::Store(format!("INSERT failed: {e}")))?;

        Ok(())
    }

    pub async fn count(&self) -> Result<usize, RetrievalError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM passages")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RetrievalError::Store(format!("COUNT failed: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| RetrievalError::Store(format!("count column: {e}")))?;
        Ok(n as usize)
    }

    fn row_to_passage(row: &sqlx::sqlite::SqliteRow) -> Result<Passage, RetrievalError> {
        let id: String = row
            .try_get("passage_id")
            .map_err(|e| RetrievalError::Store(format!("passage_id column: {e}")))?;
        let text: String = row
            .try_get("text")
            .map_err(|e| RetrievalError::Store(format!("text column: {e}")))?;
        let metadata_json: String = row
            .try_get("metadata")
            .map_err(|e| RetrievalError::Store(format!("metadata column: {e}")))?;

        let metadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
            warn!(passage_id = %id, error = %e, "Unreadable passage metadata, using empty");
            serde_json::Map::new()
        });

        Ok(Passage {
            id: PassageId(id),
            text,
            metadata,
        })
    }
}

#[async_trait]
impl PassageStore for SqlitePassageStore {
    async fn fetch_by_ids(&self, ids: &[PassageId]) -> Result<Vec<Passage>, RetrievalError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT passage_id, text, metadata FROM passages WHERE passage_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.as_str());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RetrievalError::Store(format!("SELECT failed: {e}")))?;

        rows.iter().map(Self::row_to_passage).collect()
    }
}
