//! Decides what history a turn sends to the model.
//!
//! Layout of the produced message list:
//!
//! 1. **System prompt** (caller-supplied or the default persona), always first
//! 2. **Summary** of the older history, when compression succeeded
//! 3. **History**, verbatim: everything when nothing was compressed,
//!    otherwise only the raw tail
//!
//! Compression is best-effort. Any compressor failure falls back to the
//! uncompressed history and never fails the turn.

use chrono::Utc;
use pulse_config::ContextConfig;
use pulse_core::compressor::Compressor;
use pulse_core::conversation::{ConversationStore, format_transcript};
use pulse_core::error::StorageError;
use pulse_core::event::{DomainEvent, EventBus};
use pulse_core::provider::ChatMessage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Label prefixed to the compressor output.
pub const SUMMARY_PREFIX: &str = "Prior Conversation Summary (Optimized): ";

/// Context policy knobs.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub enable_optimization: bool,
    /// Messages fetched from the store per turn
    pub history_window: usize,
    /// Newest messages always sent verbatim
    pub raw_tail: usize,
    pub default_system_prompt: String,
}

impl ContextSettings {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            enable_optimization: config.enable_optimization,
            history_window: config.history_window,
            raw_tail: config.raw_tail,
            default_system_prompt: config.system_prompt.clone(),
        }
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

pub struct ContextBuilder {
    store: Arc<dyn ConversationStore>,
    compressor: Option<Arc<dyn Compressor>>,
    settings: ContextSettings,
    events: Option<Arc<EventBus>>,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn ConversationStore>, settings: ContextSettings) -> Self {
        Self {
            store,
            compressor: None,
            settings,
            events: None,
        }
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Assemble the message list for the next inference call.
    pub async fn build(&self, system_prompt: Option<&str>) -> Result<Vec<ChatMessage>, StorageError> {
        let prompt = system_prompt.unwrap_or(&self.settings.default_system_prompt);
        let mut messages = vec![ChatMessage::system(prompt)];

        let history = self.store.history(self.settings.history_window).await?;

        let compressor = match &self.compressor {
            Some(c) if self.settings.enable_optimization && history.len() >= self.settings.raw_tail => c,
            _ => {
                debug!(messages = history.len(), "Sending history verbatim");
                messages.extend(history.iter().map(ChatMessage::with_reasoning));
                return Ok(messages);
            }
        };

        // `older` may be empty when history holds exactly `raw_tail` messages;
        // the compressor is still consulted then
        let (older, recent) = history.split_at(history.len() - self.settings.raw_tail);
        let transcript = format_transcript(older);
        // Non-empty: `recent` holds raw_tail >= 1 messages
        let anchor = recent.last().map(|m| m.content.as_str()).unwrap_or_default();

        match compressor.compress(&transcript, anchor).await {
            Ok(compressed) => {
                debug!(
                    compressor = compressor.name(),
                    older = older.len(),
                    original_chars = transcript.len(),
                    compressed_chars = compressed.content.len(),
                    "Older history compressed"
                );
                self.publish(DomainEvent::ContextCompressed {
                    original_chars: transcript.chars().count(),
                    compressed_chars: compressed.content.chars().count(),
                    timestamp: Utc::now(),
                });
                messages.push(ChatMessage::system(format!("{SUMMARY_PREFIX}{}", compressed.content)));
            }
            Err(e) => {
                warn!(compressor = compressor.name(), error = %e, "Context optimization failed, using raw history");
                self.publish(DomainEvent::ContextOptimizationFailed {
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                messages.extend(older.iter().map(ChatMessage::raw));
            }
        }

        messages.extend(recent.iter().map(ChatMessage::raw));
        Ok(messages)
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::compressor::Compressed;
    use pulse_core::error::ContextOptimizationError;
    use pulse_core::message::{Message, Metadata, REASONING_KEY, Role};
    use pulse_memory::InMemoryStore;
    use std::sync::Mutex;

    /// Records every call; fails when built with `failing()`.
    #[derive(Default)]
    struct RecordingCompressor {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingCompressor {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Compressor for RecordingCompressor {
        fn name(&self) -> &str {
            "recording"
        }

        async fn compress(&self, context: &str, anchor: &str) -> Result<Compressed, ContextOptimizationError> {
            self.calls.lock().unwrap().push((context.into(), anchor.into()));
            if self.fail {
                return Err(ContextOptimizationError::new("service unavailable"));
            }
            Ok(Compressed {
                content: "they talked".into(),
            })
        }
    }

    async fn store_with(n: usize) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store
                .insert(&Message::new(role, format!("m{i}")).with_timestamp(i as f64 + 1.0))
                .await
                .unwrap();
        }
        store
    }

    fn contents(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn short_history_skips_compressor() {
        let store = store_with(3).await;
        let compressor = Arc::new(RecordingCompressor::default());
        let builder = ContextBuilder::new(store, ContextSettings::default()).with_compressor(compressor.clone());

        let messages = builder.build(None).await.unwrap();
        assert_eq!(
            contents(&messages),
            [pulse_config::DEFAULT_SYSTEM_PROMPT, "m0", "m1", "m2"]
        );
        assert_eq!(messages[0].role, Role::System);
        assert!(compressor.calls().is_empty());
    }

    #[tokio::test]
    async fn older_history_is_summarized() {
        let store = store_with(7).await;
        let compressor = Arc::new(RecordingCompressor::default());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let builder = ContextBuilder::new(store, ContextSettings::default())
            .with_compressor(compressor.clone())
            .with_events(bus);

        let messages = builder.build(Some("be brief")).await.unwrap();
        assert_eq!(
            contents(&messages),
            [
                "be brief",
                "Prior Conversation Summary (Optimized): they talked",
                "m3",
                "m4",
                "m5",
                "m6"
            ]
        );
        assert_eq!(messages[1].role, Role::System);

        let calls = compressor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "USER: m0\nASSISTANT: m1\nUSER: m2");
        assert_eq!(calls[0].1, "m6");

        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            DomainEvent::ContextCompressed { .. }
        ));
    }

    #[tokio::test]
    async fn compressor_failure_degrades_to_raw_history() {
        let store = store_with(6).await;
        let compressor = Arc::new(RecordingCompressor::failing());
        let builder = ContextBuilder::new(store, ContextSettings::default()).with_compressor(compressor.clone());

        let messages = builder.build(None).await.unwrap();
        assert_eq!(
            contents(&messages)[1..],
            ["m0", "m1", "m2", "m3", "m4", "m5"]
        );
        assert_eq!(compressor.calls().len(), 1);
    }

    #[tokio::test]
    async fn exactly_raw_tail_still_consults_compressor() {
        let store = store_with(4).await;
        let compressor = Arc::new(RecordingCompressor::default());
        let builder = ContextBuilder::new(store, ContextSettings::default()).with_compressor(compressor.clone());

        let messages = builder.build(None).await.unwrap();
        assert_eq!(
            contents(&messages)[1..],
            [
                "Prior Conversation Summary (Optimized): they talked",
                "m0",
                "m1",
                "m2",
                "m3"
            ]
        );
        assert_eq!(compressor.calls(), [(String::new(), "m3".to_string())]);
    }

    #[tokio::test]
    async fn disabled_optimization_sends_everything() {
        let store = store_with(8).await;
        let compressor = Arc::new(RecordingCompressor::default());
        let settings = ContextSettings {
            enable_optimization: false,
            ..ContextSettings::default()
        };
        let builder = ContextBuilder::new(store, settings).with_compressor(compressor.clone());

        assert_eq!(builder.build(None).await.unwrap().len(), 9);
        assert!(compressor.calls().is_empty());
    }

    #[tokio::test]
    async fn no_compressor_sends_everything() {
        let builder = ContextBuilder::new(store_with(10).await, ContextSettings::default());
        assert_eq!(builder.build(None).await.unwrap().len(), 11);
    }

    #[tokio::test]
    async fn window_caps_fetched_history() {
        let builder = ContextBuilder::new(store_with(25).await, ContextSettings::default());
        let messages = builder.build(None).await.unwrap();
        assert_eq!(messages.len(), 21);
        // Oldest-first window
        assert_eq!(messages[1].content, "m0");
        assert_eq!(messages[20].content, "m19");
    }

    #[tokio::test]
    async fn verbatim_path_forwards_reasoning() {
        let store = Arc::new(InMemoryStore::new());
        let mut meta = Metadata::new();
        meta.insert(REASONING_KEY.into(), serde_json::json!([{"type": "reasoning.text", "text": "t"}]));
        store.append(Role::User, "q", None).await.unwrap();
        store.append(Role::Assistant, "a", Some(meta)).await.unwrap();

        let builder = ContextBuilder::new(store, ContextSettings::default());
        let messages = builder.build(None).await.unwrap();
        assert!(messages[1].reasoning_details.is_none());
        assert_eq!(
            messages[2].reasoning_details.as_ref().unwrap()[0]["text"],
            "t"
        );
    }
}
