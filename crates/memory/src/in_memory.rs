//! In-memory store, for tests and ephemeral sessions.

use async_trait::async_trait;
use pulse_core::conversation::{ConversationStore, DECRYPTION_FAILED};
use pulse_core::error::StorageError;
use pulse_core::message::Message;
use pulse_security::Cipher;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A store that keeps messages in a Vec.
///
/// Ordering and truncation match [`crate::SqliteStore`]: ascending by
/// timestamp, then capped. Equal timestamps keep insertion order.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    messages: Arc<RwLock<Vec<Message>>>,
    cipher: Option<Cipher>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cipher(cipher: Cipher) -> Self {
        Self {
            messages: Arc::default(),
            cipher: Some(cipher),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn insert(&self, message: &Message) -> Result<(), StorageError> {
        let mut stored = message.clone();
        if let Some(cipher) = &self.cipher {
            stored.content = cipher
                .encrypt(&message.content)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
        }
        self.messages.write().await.push(stored);
        Ok(())
    }

    async fn history(&self, limit: usize) -> Result<Vec<Message>, StorageError> {
        let mut messages = self.messages.read().await.clone();
        messages.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        messages.truncate(limit);

        if let Some(cipher) = &self.cipher {
            for message in &mut messages {
                message.content = cipher
                    .decrypt(&message.content)
                    .unwrap_or_else(|_| DECRYPTION_FAILED.to_string());
            }
        }
        Ok(messages)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.messages.write().await.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.messages.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::message::Role;

    #[tokio::test]
    async fn oldest_first_with_cap() {
        let store = InMemoryStore::new();
        for ts in [3.0, 1.0, 2.0] {
            store
                .insert(&Message::user(format!("t{ts}")).with_timestamp(ts))
                .await
                .unwrap();
        }
        let history = store.history(2).await.unwrap();
        assert_eq!(history[0].content, "t1");
        assert_eq!(history[1].content, "t2");
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cipher_round_trip_and_sentinel() {
        let store = InMemoryStore::with_cipher(Cipher::from_passphrase("k").unwrap());
        store.append(Role::User, "sealed", None).await.unwrap();
        store
            .messages
            .write()
            .await
            .push(Message::user("never encrypted").with_timestamp(f64::MAX));

        let history = store.history(10).await.unwrap();
        assert_eq!(history[0].content, "sealed");
        assert_eq!(history[1].content, DECRYPTION_FAILED);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = InMemoryStore::new();
        store.append(Role::User, "a", None).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
