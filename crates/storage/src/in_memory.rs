//! In-process conversation store, useful for tests and ephemeral setups.

use crate::{ConversationStore, ConversationSummary};
use async_trait::async_trait;
use powernode_core::error::StorageError;
use powernode_core::message::Conversation;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<(String, String), Conversation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, user_id: &str, conversation: &Conversation) -> Result<(), StorageError> {
        let mut map = self
            .conversations
            .write()
            .map_err(|_| StorageError::Backend("conversation map lock poisoned".into()))?;
        map.insert(
            (user_id.to_string(), conversation.id.to_string()),
            conversation.clone(),
        );
        Ok(())
    }

    async fn load(&self, user_id: &str, conversation_id: &str) -> Result<Option<Conversation>, StorageError> {
        let map = self
            .conversations
            .read()
            .map_err(|_| StorageError::Backend("conversation map lock poisoned".into()))?;
        Ok(map
            .get(&(user_id.to_string(), conversation_id.to_string()))
            .cloned())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ConversationSummary>, StorageError> {
        let map = self
            .conversations
            .read()
            .map_err(|_| StorageError::Backend("conversation map lock poisoned".into()))?;

        let mut summaries: Vec<ConversationSummary> = map
            .iter()
            .filter(|((uid, _), _)| uid == user_id)
            .map(|(_, conv)| ConversationSummary {
                id: conv.id.to_string(),
                title: conv.title.clone(),
                message_count: conv.messages.len(),
                created_at: conv.created_at,
                updated_at: conv.updated_at,
            })
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powernode_core::message::Message;

    fn conversation(id: &str, text: &str) -> Conversation {
        let mut conv = Conversation::with_id(id);
        conv.push(Message::user(text));
        conv
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let store = InMemoryStore::new();
        let conv = conversation("c1", "hello");
        store.save("alice", &conv).await.unwrap();

        let loaded = store.load("alice", "c1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = InMemoryStore::new();
        store.save("alice", &conversation("c1", "alice's")).await.unwrap();
        store.save("bob", &conversation("c1", "bob's")).await.unwrap();

        let alice = store.load("alice", "c1").await.unwrap().unwrap();
        assert_eq!(alice.messages[0].content, "alice's");
        assert!(store.load("carol", "c1").await.unwrap().is_none());
        assert_eq!(store.list("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = InMemoryStore::new();
        store.save("alice", &conversation("c1", "first")).await.unwrap();

        let mut newer = conversation("c1", "first");
        newer.push(Message::assistant("second"));
        store.save("alice", &newer).await.unwrap();

        let loaded = store.load("alice", "c1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
    }

    #[tokio::test]
    async fn list_is_most_recent_first() {
        let store = InMemoryStore::new();

        let mut old = conversation("old", "old one");
        old.updated_at = chrono::Utc::now() - chrono::Duration::hours(2);
        store.save("alice", &old).await.unwrap();

        let recent = conversation("recent", "recent one");
        store.save("alice", &recent).await.unwrap();

        let summaries = store.list("alice").await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "recent");
        assert_eq!(summaries[1].id, "old");
    }
}
