//! The orchestrator — drives one conversational turn end to end.
//!
//! Every turn runs the same sequence:
//!
//! 1. **Log** the user utterance to the conversation store
//! 2. **Match skills**: the first skill whose trigger occurs in the utterance
//!    answers, its reply is stored, and the model is never called
//! 3. **Build context** from stored history
//! 4. **Infer** across the model cascade, one-shot or streaming
//! 5. **Persist** the assistant reply with its metadata
//!
//! A failed turn surfaces exactly one error: `Storage` when the log is
//! unusable, otherwise `Inference`.

use crate::context::ContextBuilder;
use crate::turn::{Turn, TurnEvent};
use chrono::Utc;
use pulse_core::conversation::ConversationStore;
use pulse_core::error::{Error, StorageError};
use pulse_core::event::{DomainEvent, EventBus, preview};
use pulse_core::message::{Message, Metadata, REASONING_KEY, Role};
use pulse_core::provider::Usage;
use pulse_core::skill::SkillRegistry;
use pulse_providers::{FragmentStream, InferenceClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Characters of content carried in `MessageStored` events.
const PREVIEW_CHARS: usize = 80;

/// Per-turn overrides.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Replaces the default persona for this turn
    pub system_prompt: Option<String>,
    /// Leads the cascade instead of the configured default model
    pub model: Option<String>,
}

impl TurnOptions {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    context: ContextBuilder,
    inference: InferenceClient,
    skills: SkillRegistry,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        context: ContextBuilder,
        inference: InferenceClient,
        skills: SkillRegistry,
    ) -> Self {
        Self {
            store,
            context,
            inference,
            skills,
            events: Arc::new(EventBus::default()),
        }
    }

    /// Share an event bus with other components.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn skills(&self) -> &SkillRegistry {
        &self.skills
    }

    /// Run one turn and return the complete reply.
    pub async fn think(&self, input: &str, options: &TurnOptions) -> Result<String, Error> {
        let mut turn = Turn::new();
        info!(turn_id = %turn.id(), "Turn started");

        self.log_user(&mut turn, input).await?;
        if let Some(reply) = self.try_skills(&mut turn, input).await? {
            return Ok(reply);
        }

        let messages = match self.context.build(options.system_prompt.as_deref()).await {
            Ok(messages) => messages,
            Err(e) => return Err(self.abort(&mut turn, e.into())),
        };
        turn.advance(TurnEvent::ContextReady);
        turn.advance(TurnEvent::InferenceStarted);

        let started = Instant::now();
        let response = match self.inference.complete(&messages, options.model.as_deref()).await {
            Ok(response) => response,
            Err(e) => return Err(self.abort(&mut turn, e.into())),
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut metadata = Metadata::new();
        metadata.insert("model".into(), json!(response.model));
        metadata.insert("latency_ms".into(), json!(latency_ms));
        if let Some(usage) = &response.usage {
            metadata.insert("usage".into(), json!(usage));
        }
        if let Some(reasoning) = &response.reasoning_details {
            metadata.insert(REASONING_KEY.into(), reasoning.clone());
        }

        if let Err(e) = self.record(Role::Assistant, &response.content, metadata).await {
            return Err(self.abort(&mut turn, e.into()));
        }

        self.events.publish(DomainEvent::ResponseGenerated {
            turn_id: turn.id().to_string(),
            model: response.model.clone(),
            tokens_used: response.usage.as_ref().map_or(0, |u| u.total_tokens),
            latency_ms,
            streamed: false,
            timestamp: Utc::now(),
        });
        turn.advance(TurnEvent::Finished);
        info!(turn_id = %turn.id(), model = %response.model, latency_ms, "Turn completed");

        Ok(response.content)
    }

    /// Run one turn, delivering the reply as it is generated.
    ///
    /// A skill reply comes back as a single fragment. Otherwise the stream
    /// is committed to one model; whatever it produced is persisted when
    /// the stream ends, fails, or is dropped.
    pub async fn think_stream(&self, input: &str, options: &TurnOptions) -> Result<TurnStream, Error> {
        let mut turn = Turn::new();
        info!(turn_id = %turn.id(), "Streaming turn started");

        self.log_user(&mut turn, input).await?;
        if let Some(reply) = self.try_skills(&mut turn, input).await? {
            return Ok(TurnStream::canned(turn, reply, self.store.clone(), self.events.clone()));
        }

        let messages = match self.context.build(options.system_prompt.as_deref()).await {
            Ok(messages) => messages,
            Err(e) => return Err(self.abort(&mut turn, e.into())),
        };
        turn.advance(TurnEvent::ContextReady);
        turn.advance(TurnEvent::InferenceStarted);

        let started = Instant::now();
        match self.inference.stream(&messages, options.model.as_deref()).await {
            Ok(fragments) => Ok(TurnStream {
                turn,
                store: self.store.clone(),
                events: self.events.clone(),
                fragments: Some(fragments),
                canned: None,
                buffer: String::new(),
                started,
                persisted: false,
            }),
            Err(e) => Err(self.abort(&mut turn, e.into())),
        }
    }

    /// Delete every stored message.
    pub async fn clear_memory(&self) -> Result<(), Error> {
        self.store.clear().await?;
        info!("Conversation memory cleared");
        Ok(())
    }

    /// Stored messages, oldest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<Message>, Error> {
        Ok(self.store.history(limit).await?)
    }

    async fn log_user(&self, turn: &mut Turn, input: &str) -> Result<(), Error> {
        match self.record(Role::User, input, Metadata::new()).await {
            Ok(()) => {
                turn.advance(TurnEvent::UserStored);
                Ok(())
            }
            Err(e) => Err(self.abort(turn, e.into())),
        }
    }

    /// Answer from the first matching skill, if any.
    async fn try_skills(&self, turn: &mut Turn, input: &str) -> Result<Option<String>, Error> {
        let Some(skill) = self.skills.find(input) else {
            return Ok(None);
        };

        info!(turn_id = %turn.id(), skill = skill.name(), "Executing skill");
        let reply = skill.execute(input);

        let mut metadata = Metadata::new();
        metadata.insert("skill".into(), json!(skill.name()));
        if let Err(e) = self.record(Role::Assistant, &reply, metadata).await {
            return Err(self.abort(turn, e.into()));
        }

        self.events.publish(DomainEvent::SkillInvoked {
            turn_id: turn.id().to_string(),
            skill: skill.name().to_string(),
            timestamp: Utc::now(),
        });
        turn.advance(TurnEvent::SkillMatched);
        Ok(Some(reply))
    }

    async fn record(&self, role: Role, content: &str, metadata: Metadata) -> Result<(), StorageError> {
        let message = self.store.append(role, content, Some(metadata)).await?;
        publish_stored(&self.events, &message);
        Ok(())
    }

    fn abort(&self, turn: &mut Turn, error: Error) -> Error {
        warn!(turn_id = %turn.id(), state = %turn.state(), error = %error, "Turn aborted");
        turn.advance(TurnEvent::Failed);
        self.events.publish(DomainEvent::TurnAborted {
            turn_id: turn.id().to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        error
    }
}

fn publish_stored(events: &EventBus, message: &Message) {
    events.publish(DomainEvent::MessageStored {
        role: message.role,
        content_preview: preview(&message.content, PREVIEW_CHARS),
        timestamp: Utc::now(),
    });
}

/// A streaming turn in progress.
///
/// Fragments are forwarded as they arrive and accumulated. The accumulated
/// text is stored as one assistant message, exactly once, when the stream
/// ends, fails, or is cancelled.
///
/// Dropping an unfinished stream stamps the partial reply immediately and
/// inserts it from a task spawned on the current runtime. Outside a tokio
/// runtime there is nowhere to run that write and the partial reply is lost
/// (a warning is logged). Call [`TurnStream::cancel`] to have it stored
/// before control returns.
pub struct TurnStream {
    turn: Turn,
    store: Arc<dyn ConversationStore>,
    events: Arc<EventBus>,
    fragments: Option<FragmentStream>,
    /// Skill reply, already stored
    canned: Option<String>,
    buffer: String,
    started: Instant,
    persisted: bool,
}

impl TurnStream {
    fn canned(turn: Turn, reply: String, store: Arc<dyn ConversationStore>, events: Arc<EventBus>) -> Self {
        Self {
            turn,
            store,
            events,
            fragments: None,
            canned: Some(reply),
            buffer: String::new(),
            started: Instant::now(),
            persisted: true,
        }
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn.id()
    }

    /// The answering model; `None` for skill replies.
    pub fn model(&self) -> Option<&str> {
        self.fragments.as_ref().map(FragmentStream::model)
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// The next fragment, or `None` once the turn is over.
    pub async fn next(&mut self) -> Option<Result<String, Error>> {
        if let Some(reply) = self.canned.take() {
            return Some(Ok(reply));
        }

        let fragments = self.fragments.as_mut()?;
        if self.persisted {
            return None;
        }

        match fragments.next().await {
            Some(Ok(text)) => {
                self.buffer.push_str(&text);
                Some(Ok(text))
            }
            None => match self.persist(false).await {
                Ok(()) => {
                    self.complete();
                    None
                }
                Err(e) => Some(Err(self.fail(e.into()))),
            },
            Some(Err(inference)) => {
                // A storage failure outranks the inference error
                let error = match self.persist(true).await {
                    Ok(()) => Error::from(inference),
                    Err(storage) => storage.into(),
                };
                Some(Err(self.fail(error)))
            }
        }
    }

    /// Drain the remaining fragments and return the full reply.
    pub async fn finish(mut self) -> Result<String, Error> {
        if let Some(reply) = self.canned.take() {
            return Ok(reply);
        }
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(std::mem::take(&mut self.buffer))
    }

    /// Stop early. The text received so far is stored before this returns,
    /// unlike dropping the stream, and is returned.
    pub async fn cancel(mut self) -> Result<String, Error> {
        if let Some(reply) = self.canned.take() {
            return Ok(reply);
        }
        if let Some(fragments) = self.fragments.as_mut() {
            fragments.close();
        }
        if !self.persisted {
            debug!(turn_id = %self.turn.id(), chars = self.buffer.len(), "Streaming turn cancelled");
            if let Err(e) = self.persist(true).await {
                return Err(self.fail(e.into()));
            }
            self.turn.advance(TurnEvent::Failed);
        }
        Ok(std::mem::take(&mut self.buffer))
    }

    fn model_name(&self) -> String {
        self.model().unwrap_or_default().to_string()
    }

    fn stream_metadata(&self, partial: bool) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("model".into(), json!(self.model_name()));
        metadata.insert("latency_ms".into(), json!(self.started.elapsed().as_millis() as u64));
        metadata.insert("partial".into(), json!(partial));
        if let Some(usage) = self.fragments.as_ref().and_then(FragmentStream::usage) {
            metadata.insert("usage".into(), json!(usage));
        }
        metadata
    }

    /// Store the accumulated text, at most once per stream.
    async fn persist(&mut self, partial: bool) -> Result<(), StorageError> {
        if self.persisted {
            return Ok(());
        }
        self.persisted = true;
        if self.buffer.is_empty() {
            return Ok(());
        }

        let metadata = self.stream_metadata(partial);
        let message = self
            .store
            .append(Role::Assistant, &self.buffer, Some(metadata))
            .await?;
        publish_stored(&self.events, &message);
        Ok(())
    }

    fn complete(&mut self) {
        let tokens_used = self
            .fragments
            .as_ref()
            .and_then(FragmentStream::usage)
            .map_or(0, |u: &Usage| u.total_tokens);
        let latency_ms = self.started.elapsed().as_millis() as u64;
        self.events.publish(DomainEvent::ResponseGenerated {
            turn_id: self.turn.id().to_string(),
            model: self.model_name(),
            tokens_used,
            latency_ms,
            streamed: true,
            timestamp: Utc::now(),
        });
        self.turn.advance(TurnEvent::Finished);
        info!(turn_id = %self.turn.id(), model = %self.model_name(), latency_ms, "Streaming turn completed");
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!(turn_id = %self.turn.id(), error = %error, chars = self.buffer.len(), "Streaming turn aborted");
        self.turn.advance(TurnEvent::Failed);
        self.events.publish(DomainEvent::TurnAborted {
            turn_id: self.turn.id().to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        error
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if self.persisted || self.buffer.is_empty() {
            return;
        }
        self.persisted = true;

        // Stamped here, not in the task, so the reply sorts before anything
        // the caller stores next
        let metadata = self.stream_metadata(true);
        let message = Message::new(Role::Assistant, std::mem::take(&mut self.buffer)).with_metadata(metadata);
        let store = self.store.clone();
        let events = self.events.clone();
        let turn_id = self.turn.id();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(turn_id = %turn_id, "Persisting partial reply from dropped stream");
                handle.spawn(async move {
                    match store.insert(&message).await {
                        Ok(()) => publish_stored(&events, &message),
                        Err(e) => warn!(turn_id = %turn_id, error = %e, "Failed to persist partial reply"),
                    }
                });
            }
            Err(_) => warn!(
                turn_id = %turn_id,
                chars = message.content.len(),
                "No runtime available, partial reply not persisted"
            ),
        }
    }
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("turn_id", &self.turn.id())
            .field("state", &self.turn.state())
            .field("chars", &self.buffer.len())
            .field("persisted", &self.persisted)
            .finish()
    }
}
