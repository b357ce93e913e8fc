//! ConversationStore trait — the durable, append-only conversation log.
//!
//! Stores only ever insert rows or clear everything. Reads come back ordered
//! by `timestamp` ascending. Timestamps from [`Message::new`] never repeat
//! within a process; explicitly stamped messages that tie have no defined
//! relative order.

use async_trait::async_trait;
use crate::error::StorageError;
use crate::message::{Message, Metadata, Role};

/// Content returned for a row whose ciphertext could not be decrypted.
pub const DECRYPTION_FAILED: &str = "[Decryption Failed]";

/// Default cap used when rendering a transcript for compression.
pub const DEFAULT_CONTEXT_LIMIT: usize = 50;

/// Render messages as newline-joined `ROLE: content` lines.
pub fn format_transcript<'a>(messages: impl IntoIterator<Item = &'a Message>) -> String {
    messages
        .into_iter()
        .map(Message::transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// The core ConversationStore trait.
///
/// Implementations: SQLite (optionally encrypted), in-memory (for testing).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Persist a fully constructed message atomically.
    async fn insert(&self, message: &Message) -> std::result::Result<(), StorageError>;

    /// Oldest-first messages, at most `limit` of them.
    ///
    /// The cap applies after ascending ordering, so a full log yields its
    /// earliest `limit` entries rather than its latest.
    async fn history(&self, limit: usize) -> std::result::Result<Vec<Message>, StorageError>;

    /// Delete every message. Succeeds on an empty log.
    async fn clear(&self) -> std::result::Result<(), StorageError>;

    /// Total number of stored messages.
    async fn count(&self) -> std::result::Result<usize, StorageError>;

    /// Build a message stamped now and persist it.
    async fn append(
        &self,
        role: Role,
        content: &str,
        metadata: Option<Metadata>,
    ) -> std::result::Result<Message, StorageError> {
        let message = Message::new(role, content).with_metadata(metadata.unwrap_or_default());
        self.insert(&message).await?;
        Ok(message)
    }

    /// History projected as a `ROLE: content` block. Not canonical data.
    async fn context_string(&self, limit: usize) -> std::result::Result<String, StorageError> {
        let messages = self.history(limit).await?;
        Ok(format_transcript(&messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_joins_lines() {
        let msgs = vec![Message::user("hi"), Message::assistant("hello")];
        assert_eq!(format_transcript(&msgs), "USER: hi\nASSISTANT: hello");
    }

    #[test]
    fn empty_transcript_is_empty_string() {
        assert_eq!(format_transcript(&Vec::<Message>::new()), "");
    }
}
