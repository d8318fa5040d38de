//! SQLite conversation store with blob spill for oversized payloads.
//!
//! One `conversations` table keyed by (user_id, conversation_id). The
//! serialized conversation lives inline in the row up to the configured
//! size limit; above it the JSON goes to a file in the blob directory and
//! the row keeps only the file name. Loads resolve the reference
//! transparently.

use crate::{ConversationStore, ConversationSummary};
use async_trait::async_trait;
use chrono::Utc;
use powernode_core::error::StorageError;
use powernode_core::message::Conversation;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

pub struct SqliteStore {
    pool: SqlitePool,
    blob_dir: PathBuf,
    inline_limit_bytes: usize,
}

impl SqliteStore {
    /// Open (creating if needed) the database and blob directory.
    pub async fn new(path: &str, blob_dir: &str, inline_limit_bytes: usize) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Backend(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to open SQLite: {e}")))?;

        tokio::fs::create_dir_all(blob_dir)
            .await
            .map_err(|e| StorageError::Blob(format!("Failed to create blob directory: {e}")))?;

        let store = Self {
            pool,
            blob_dir: PathBuf::from(blob_dir),
            inline_limit_bytes,
        };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                user_id         TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                title           TEXT,
                message_count   INTEGER NOT NULL DEFAULT 0,
                payload         TEXT,
                blob_ref        TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                PRIMARY KEY (user_id, conversation_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user_updated
             ON conversations(user_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::MigrationFailed(format!("user_updated index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    async fn previous_blob_ref(&self, user_id: &str, conversation_id: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT blob_ref FROM conversations WHERE user_id = ?1 AND conversation_id = ?2")
            .bind(user_id)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("blob_ref lookup: {e}")))?;

        match row {
            Some(r) => r
                .try_get::<Option<String>, _>("blob_ref")
                .map_err(|e| StorageError::QueryFailed(format!("blob_ref column: {e}"))),
            None => Ok(None),
        }
    }

    async fn remove_blob(&self, blob_ref: &str) {
        let path = self.blob_dir.join(blob_ref);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Stale blob {} not removed: {e}", path.display());
        }
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, user_id: &str, conversation: &Conversation) -> Result<(), StorageError> {
        let payload = serde_json::to_string(conversation)
            .map_err(|e| StorageError::Serialization(format!("Conversation serialization: {e}")))?;

        let previous_ref = self.previous_blob_ref(user_id, &conversation.id.to_string()).await?;

        let (inline, blob_ref) = if payload.len() > self.inline_limit_bytes {
            let file_name = format!("{}.json", Uuid::new_v4());
            tokio::fs::write(self.blob_dir.join(&file_name), &payload)
                .await
                .map_err(|e| StorageError::Blob(format!("Blob write failed: {e}")))?;
            debug!(
                "Conversation {} spilled to blob {file_name} ({} bytes)",
                conversation.id,
                payload.len()
            );
            (None, Some(file_name))
        } else {
            (Some(payload), None)
        };

        sqlx::query(
            r#"
            INSERT INTO conversations
                (user_id, conversation_id, title, message_count, payload, blob_ref, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id, conversation_id) DO UPDATE SET
                title = excluded.title,
                message_count = excluded.message_count,
                payload = excluded.payload,
                blob_ref = excluded.blob_ref,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(conversation.id.to_string())
        .bind(&conversation.title)
        .bind(conversation.messages.len() as i64)
        .bind(&inline)
        .bind(&blob_ref)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("Conversation upsert: {e}")))?;

        if let Some(old) = previous_ref {
            if blob_ref.as_deref() != Some(old.as_str()) {
                self.remove_blob(&old).await;
            }
        }

        Ok(())
    }

    async fn load(&self, user_id: &str, conversation_id: &str) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query("SELECT payload, blob_ref FROM conversations WHERE user_id = ?1 AND conversation_id = ?2")
            .bind(user_id)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(format!("Conversation lookup: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: Option<String> = row
            .try_get("payload")
            .map_err(|e| StorageError::QueryFailed(format!("payload column: {e}")))?;
        let blob_ref: Option<String> = row
            .try_get("blob_ref")
            .map_err(|e| StorageError::QueryFailed(format!("blob_ref column: {e}")))?;

        let json = match (payload, blob_ref) {
            (Some(payload), _) => payload,
            (None, Some(blob_ref)) => tokio::fs::read_to_string(self.blob_dir.join(&blob_ref))
                .await
                .map_err(|e| StorageError::Blob(format!("Blob {blob_ref} read failed: {e}")))?,
            (None, None) => {
                return Err(StorageError::Backend(
                    "conversation row has neither payload nor blob reference".into(),
                ));
            }
        };

        let conversation: Conversation = serde_json::from_str(&json)
            .map_err(|e| StorageError::Serialization(format!("Conversation parse: {e}")))?;
        Ok(Some(conversation))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ConversationSummary>, StorageError> {
        let rows = sqlx::query(
            "SELECT conversation_id, title, message_count, created_at, updated_at
             FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(format!("Conversation listing: {e}")))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("conversation_id")
                    .map_err(|e| StorageError::QueryFailed(format!("conversation_id column: {e}")))?;
                let title: Option<String> = row
                    .try_get("title")
                    .map_err(|e| StorageError::QueryFailed(format!("title column: {e}")))?;
                let message_count: i64 = row
                    .try_get("message_count")
                    .map_err(|e| StorageError::QueryFailed(format!("message_count column: {e}")))?;
                let created_at_str: String = row
                    .try_get("created_at")
                    .map_err(|e| StorageError::QueryFailed(format!("created_at column: {e}")))?;
                let updated_at_str: String = row
                    .try_get("updated_at")
                    .map_err(|e| StorageError::QueryFailed(format!("updated_at column: {e}")))?;

                let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at_str)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());

                Ok(ConversationSummary {
                    id,
                    title,
                    message_count: message_count as usize,
                    created_at,
                    updated_at,
                })
            })
            .collect()
    }
}
