//! Conversation persistence for PowerNode.
//!
//! Conversations are keyed by (user id, conversation id) and written with
//! last-write-wins semantics after every chat turn. Oversized payloads
//! spill to blob files next to the database; callers never see the
//! difference on load.

pub mod in_memory;
pub mod noop;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use noop::NoopStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use powernode_config::StorageConfig;
use powernode_core::error::StorageError;
use powernode_core::message::Conversation;
use std::sync::Arc;

/// Listing row for a user's conversations; payloads stay on disk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic conversation store.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Backend name for logs and health output.
    fn name(&self) -> &str;

    /// Persist a conversation under (user_id, conversation.id), replacing
    /// any previous version.
    async fn save(&self, user_id: &str, conversation: &Conversation) -> Result<(), StorageError>;

    /// Load a conversation, or `None` when the key is unknown.
    async fn load(&self, user_id: &str, conversation_id: &str) -> Result<Option<Conversation>, StorageError>;

    /// List a user's conversations, most recently updated first.
    async fn list(&self, user_id: &str) -> Result<Vec<ConversationSummary>, StorageError>;
}

/// Build the configured store.
pub async fn store_from_config(config: &StorageConfig) -> Result<Arc<dyn ConversationStore>, StorageError> {
    match config.backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let store = SqliteStore::new(&config.path, &config.blob_dir, config.inline_limit_bytes).await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "none" => Ok(Arc::new(NoopStore)),
        other => Err(StorageError::Backend(format!("Unknown storage backend: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_rejects_unknown_backend() {
        let config = StorageConfig {
            backend: "cassandra".into(),
            ..StorageConfig::default()
        };
        let err = match store_from_config(&config).await {
            Err(err) => err,
            Ok(_) => panic!("expected an error for unknown backend"),
        };
        assert!(err.to_string().contains("cassandra"));
    }

    #[tokio::test]
    async fn factory_builds_memory_and_noop() {
        let memory = store_from_config(&StorageConfig {
            backend: "memory".into(),
            ..StorageConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(memory.name(), "memory");

        let none = store_from_config(&StorageConfig {
            backend: "none".into(),
            ..StorageConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(none.name(), "none");
    }
}
