//! Domain event system — decoupled observation of turns.
//!
//! Events are published when something interesting happens during a turn.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::message::Role;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A message was appended to the conversation log
    MessageStored {
        role: Role,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A skill answered instead of the model
    SkillInvoked {
        turn_id: String,
        skill: String,
        timestamp: DateTime<Utc>,
    },

    /// Older history was replaced by a compressor summary
    ContextCompressed {
        original_chars: usize,
        compressed_chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// The compressor failed and raw history was used instead
    ContextOptimizationFailed {
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The cascade moved on to the next candidate model
    ModelFallback {
        from_model: String,
        to_model: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The model produced a reply for a turn
    ResponseGenerated {
        turn_id: String,
        model: String,
        tokens_used: u32,
        latency_ms: u64,
        streamed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A turn ended with an error
    TurnAborted {
        turn_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// First `max_chars` characters of `content`, for event payloads.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::SkillInvoked {
            turn_id: "t1".into(),
            skill: "time".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::SkillInvoked { skill, .. } => assert_eq!(skill, "time"),
            _ => panic!("Expected SkillInvoked event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TurnAborted {
            turn_id: "t1".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }
}
