//! SQLite conversation store.
//!
//! One table, `messages`, holding `(id, role, content, timestamp, metadata)`.
//! Content is encrypted before it reaches the database when the store is
//! bound to a [`Cipher`]; metadata is stored as a JSON object.
//!
//! Every operation checks a connection out of the pool for its own duration
//! only, so callers on different tasks never share one open handle.

use async_trait::async_trait;
use pulse_core::conversation::{ConversationStore, DECRYPTION_FAILED};
use pulse_core::error::StorageError;
use pulse_core::message::{Message, Metadata, Role};
use pulse_security::Cipher;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// An append-only SQLite conversation store, optionally encrypted.
pub struct SqliteStore {
    pool: SqlitePool,
    cipher: Option<Cipher>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    ///
    /// The table and index are created automatically.
    pub async fn open(path: impl AsRef<Path>, cipher: Option<Cipher>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Open(format!("{}: {e}", path.display())))?;

        let store = Self::from_pool(pool, cipher).await?;
        info!(
            encrypted = store.is_encrypted(),
            "SQLite conversation store opened at {}",
            path.display()
        );
        Ok(store)
    }

    /// An ephemeral in-process database (useful for tests).
    ///
    /// Uses a single never-recycled connection so the data outlives each call.
    pub async fn in_memory(cipher: Option<Cipher>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(|e| StorageError::Open(format!("in-memory options: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Open(format!("in-memory database: {e}")))?;

        Self::from_pool(pool, cipher).await
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool, cipher: Option<Cipher>) -> Result<Self, StorageError> {
        let store = Self { pool, cipher };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                role      TEXT NOT NULL,
                content   TEXT NOT NULL,
                timestamp REAL NOT NULL,
                metadata  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Migration(format!("messages table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(format!("timestamp index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn seal(&self, content: &str) -> Result<String, StorageError> {
        match &self.cipher {
            Some(cipher) => cipher
                .encrypt(content)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            None => Ok(content.to_string()),
        }
    }

    fn open_content(&self, stored: String) -> String {
        match &self.cipher {
            Some(cipher) => cipher.decrypt(&stored).unwrap_or_else(|e| {
                warn!(error = %e, "Stored message could not be decrypted");
                DECRYPTION_FAILED.to_string()
            }),
            None => stored,
        }
    }

    /// Parse a `Message` from a row. Rows with an unknown role yield `None`.
    fn row_to_message(&self, row: &SqliteRow) -> Result<Option<Message>, StorageError> {
        let role_str: String = row
            .try_get("role")
            .map_err(|e| StorageError::Query(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StorageError::Query(format!("content column: {e}")))?;
        let timestamp: f64 = row
            .try_get("timestamp")
            .map_err(|e| StorageError::Query(format!("timestamp column: {e}")))?;
        let metadata_json: Option<String> = row
            .try_get("metadata")
            .map_err(|e| StorageError::Query(format!("metadata column: {e}")))?;

        let role = match Role::from_str(&role_str) {
            Ok(role) => role,
            Err(e) => {
                warn!(error = %e, timestamp, "Skipping stored message");
                return Ok(None);
            }
        };

        let metadata: Metadata = metadata_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        Ok(Some(Message {
            role,
            content: self.open_content(content),
            timestamp,
            metadata,
        }))
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, message: &Message) -> Result<(), StorageError> {
        let content = self.seal(&message.content)?;
        let metadata_json = serde_json::to_string(&message.metadata)
            .map_err(|e| StorageError::Serialization(format!("metadata: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Write(format!("BEGIN failed: {e}")))?;

        sqlx::query("INSERT INTO messages (role, content, timestamp, metadata) VALUES (?1, ?2, ?3, ?4)")
            .bind(message.role.as_str())
            .bind(&content)
            .bind(message.timestamp)
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Write(format!("INSERT failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Write(format!("COMMIT failed: {e}")))?;

        debug!(role = %message.role, "Stored message");
        Ok(())
    }

    async fn history(&self, limit: usize) -> Result<Vec<Message>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT role, content, timestamp, metadata FROM messages \
             WHERE role IN ('system', 'user', 'assistant') \
             ORDER BY timestamp ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(format!("history: {e}")))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(message) = self.row_to_message(row)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM messages")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Write(format!("DELETE failed: {e}")))?;
        info!(removed = result.rows_affected(), "Conversation history cleared");
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Query(format!("COUNT failed: {e}")))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StorageError::Query(format!("count column: {e}")))?;
        Ok(count as usize)
    }
}
