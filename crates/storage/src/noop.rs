//! No-op store for deployments that disable persistence.

use crate::{ConversationStore, ConversationSummary};
use async_trait::async_trait;
use powernode_core::error::StorageError;
use powernode_core::message::Conversation;

pub struct NoopStore;

#[async_trait]
impl ConversationStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn save(&self, _user_id: &str, _conversation: &Conversation) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load(&self, _user_id: &str, _conversation_id: &str) -> Result<Option<Conversation>, StorageError> {
        Ok(None)
    }

    async fn list(&self, _user_id: &str) -> Result<Vec<ConversationSummary>, StorageError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_writes_and_returns_nothing() {
        let store = NoopStore;
        let conv = Conversation::with_id("c1");
        store.save("alice", &conv).await.unwrap();
        assert!(store.load("alice", "c1").await.unwrap().is_none());
        assert!(store.list("alice").await.unwrap().is_empty());
    }
}
