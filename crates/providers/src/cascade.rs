//! Model cascade — ordered fallback across candidate models.
//!
//! One inference call walks the cascade front to back. Each candidate gets
//! a small number of transport-level retries for throttling, then its
//! failure is classified: retryable failures advance to the next model,
//! fatal ones abort the call.
//!
//! Streaming can only hand off to another model before the first fragment
//! has been produced. After that a failure ends the stream.

use chrono::Utc;
use pulse_config::InferenceConfig;
use pulse_core::error::{InferenceError, ProviderError};
use pulse_core::event::{DomainEvent, EventBus};
use pulse_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest server-requested wait honoured between transport retries.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Transport retry policy for throttling signals.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given the server's Retry-After.
    pub fn backoff_for(&self, attempt: u32, retry_after_secs: u64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let computed = self.initial_backoff.saturating_mul(1u32 << exponent);
        let requested = Duration::from_secs(retry_after_secs).min(MAX_RETRY_AFTER);
        computed.max(requested)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(2000),
        }
    }
}

/// Immutable inference settings, built once at startup.
#[derive(Debug, Clone)]
pub struct CascadeSettings {
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub reasoning: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CascadeSettings {
    pub fn new(default_model: impl Into<String>, fallback_models: Vec<String>) -> Self {
        Self {
            default_model: default_model.into(),
            fallback_models,
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            reasoning: false,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            default_model: config.default_model.clone(),
            fallback_models: config.fallback_models.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                initial_backoff: Duration::from_millis(config.retry.initial_backoff_ms),
            },
            reasoning: config.enable_reasoning,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// An ordered, deduplicated list of candidate models.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCascade {
    models: Vec<String>,
}

impl ModelCascade {
    /// Primary first, then fallbacks; repeats of an earlier entry are dropped.
    pub fn new(primary: impl Into<String>, fallbacks: &[String]) -> Self {
        let mut models: Vec<String> = vec![primary.into()];
        for model in fallbacks {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        Self { models }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// How the cascade treats a failed candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Try the next model
    Retryable,
    /// Stop the cascade
    Fatal,
}

pub fn classify(error: &ProviderError) -> FailureClass {
    match error {
        ProviderError::RateLimited { .. }
        | ProviderError::ModelNotFound(_)
        | ProviderError::Timeout(_) => FailureClass::Retryable,
        ProviderError::ApiError { status_code, .. } if (500..600).contains(status_code) => {
            FailureClass::Retryable
        }
        _ => FailureClass::Fatal,
    }
}

fn classified(model: &str, source: ProviderError) -> InferenceError {
    let model = model.to_string();
    match classify(&source) {
        FailureClass::Retryable => InferenceError::Retryable { model, source },
        FailureClass::Fatal => InferenceError::Fatal { model, source },
    }
}

/// Executes completion requests against a [`ModelCascade`].
pub struct InferenceClient {
    provider: Arc<dyn Provider>,
    settings: CascadeSettings,
    events: Option<Arc<EventBus>>,
}

impl InferenceClient {
    pub fn new(provider: Arc<dyn Provider>, settings: CascadeSettings) -> Self {
        Self {
            provider,
            settings,
            events: None,
        }
    }

    /// Publish `ModelFallback` events on this bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    /// The cascade for one call: the requested model or the default, then fallbacks.
    pub fn cascade(&self, requested: Option<&str>) -> ModelCascade {
        let primary = requested
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.settings.default_model);
        ModelCascade::new(primary, &self.settings.fallback_models)
    }

    fn request(&self, model: &str, messages: &[ChatMessage]) -> ProviderRequest {
        ProviderRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            reasoning: self.settings.reasoning,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// One-shot completion. The first candidate to answer wins.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> Result<ProviderResponse, InferenceError> {
        let cascade = self.cascade(model);
        let mut attempted = Vec::with_capacity(cascade.len());
        let mut last = None;

        for (i, candidate) in cascade.iter().enumerate() {
            info!(
                model = %candidate,
                attempt = i + 1,
                total = cascade.len(),
                "Cascade: trying model"
            );
            attempted.push(candidate.to_string());
            let request = self.request(candidate, messages);

            let outcome = self
                .with_transport_retry(candidate, || self.provider.complete(request.clone()))
                .await;

            match outcome {
                Ok(mut response) => {
                    if response.model.is_empty() {
                        response.model = candidate.to_string();
                    }
                    info!(model = %response.model, "Cascade: model succeeded");
                    return Ok(response);
                }
                Err(source) => {
                    let error = classified(candidate, source);
                    if !error.is_retryable() {
                        warn!(model = %candidate, error = %error, "Cascade: fatal failure, aborting");
                        return Err(error);
                    }
                    self.note_fallback(candidate, cascade.models().get(i + 1), &error);
                    last = Some(error);
                }
            }
        }

        Err(exhausted(attempted, last))
    }

    /// Streaming completion.
    ///
    /// Each candidate is held until it produces its first fragment, so a
    /// failure before that point can still move on to the next model.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> Result<FragmentStream, InferenceError> {
        let cascade = self.cascade(model);
        let mut attempted = Vec::with_capacity(cascade.len());
        let mut last = None;

        for (i, candidate) in cascade.iter().enumerate() {
            info!(
                model = %candidate,
                attempt = i + 1,
                total = cascade.len(),
                "Cascade: opening stream"
            );
            attempted.push(candidate.to_string());
            let request = self.request(candidate, messages);

            let outcome = self
                .with_transport_retry(candidate, || self.open_stream(request.clone()))
                .await;

            match outcome {
                Ok(opened) => {
                    debug!(model = %candidate, has_output = opened.first.is_some(), "Stream committed");
                    return Ok(FragmentStream {
                        model: candidate.to_string(),
                        pending: opened.first,
                        rx: opened.rx,
                        usage: opened.usage,
                        idle_timeout: self.settings.request_timeout,
                    });
                }
                Err(source) => {
                    let error = classified(candidate, source);
                    if !error.is_retryable() {
                        warn!(model = %candidate, error = %error, "Cascade: fatal stream failure, aborting");
                        return Err(error);
                    }
                    self.note_fallback(candidate, cascade.models().get(i + 1), &error);
                    last = Some(error);
                }
            }
        }

        Err(exhausted(attempted, last))
    }

    /// Open a provider stream and wait for its first non-empty fragment.
    async fn open_stream(&self, request: ProviderRequest) -> Result<OpenedStream, ProviderError> {
        let mut rx = self.provider.stream(request).await?;
        let mut usage = None;

        while let Some(item) = rx.recv().await {
            let chunk = item?;
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if let Some(text) = chunk.content.filter(|c| !c.is_empty()) {
                return Ok(OpenedStream {
                    rx: (!chunk.done).then_some(rx),
                    first: Some(text),
                    usage,
                });
            }
            if chunk.done {
                break;
            }
        }

        Ok(OpenedStream {
            rx: None,
            first: None,
            usage,
        })
    }

    /// Run `call` with per-attempt timeouts, retrying only on throttling.
    async fn with_transport_retry<T, F, Fut>(&self, model: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let policy = &self.settings.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(self.settings.request_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "{model} did not respond within {}s",
                    self.settings.request_timeout.as_secs()
                ))),
            };

            match outcome {
                Err(error) if error.is_throttle() && attempt < max_attempts => {
                    let retry_after = match &error {
                        ProviderError::RateLimited { retry_after_secs } => *retry_after_secs,
                        _ => 0,
                    };
                    let delay = policy.backoff_for(attempt, retry_after);
                    warn!(
                        model = %model,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Throttled, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn note_fallback(&self, from: &str, to: Option<&String>, error: &InferenceError) {
        let Some(to) = to else {
            warn!(model = %from, error = %error, "Cascade: last model failed");
            return;
        };
        warn!(from = %from, to = %to, error = %error, "Cascade: model failed, trying next");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ModelFallback {
                from_model: from.to_string(),
                to_model: to.clone(),
                reason: error.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}

fn exhausted(attempted: Vec<String>, last: Option<InferenceError>) -> InferenceError {
    let last = last.unwrap_or_else(|| InferenceError::Fatal {
        model: String::new(),
        source: ProviderError::NotConfigured("no candidate models".into()),
    });
    InferenceError::Exhausted {
        attempted,
        last: Box::new(last),
    }
}

struct OpenedStream {
    rx: Option<ChunkReceiver>,
    first: Option<String>,
    usage: Option<Usage>,
}

/// A lazy, finite sequence of text fragments from one committed model.
///
/// Not restartable. Dropping it closes the underlying connection.
pub struct FragmentStream {
    model: String,
    pending: Option<String>,
    rx: Option<ChunkReceiver>,
    usage: Option<Usage>,
    idle_timeout: Duration,
}

impl FragmentStream {
    /// The next fragment, `None` once the stream has ended.
    ///
    /// An `Err` is terminal; later calls return `None`.
    pub async fn next(&mut self) -> Option<Result<String, InferenceError>> {
        if let Some(first) = self.pending.take() {
            return Some(Ok(first));
        }

        loop {
            let rx = self.rx.as_mut()?;
            match tokio::time::timeout(self.idle_timeout, rx.recv()).await {
                Err(_) => {
                    self.rx = None;
                    return Some(Err(self.interrupted(ProviderError::Timeout(format!(
                        "no fragment within {}s",
                        self.idle_timeout.as_secs()
                    )))));
                }
                Ok(None) => {
                    self.rx = None;
                    return None;
                }
                Ok(Some(Err(source))) => {
                    self.rx = None;
                    return Some(Err(self.interrupted(source)));
                }
                Ok(Some(Ok(chunk))) => {
                    if chunk.usage.is_some() {
                        self.usage = chunk.usage;
                    }
                    if chunk.done {
                        self.rx = None;
                    }
                    if let Some(text) = chunk.content.filter(|c| !c.is_empty()) {
                        return Some(Ok(text));
                    }
                    if chunk.done {
                        return None;
                    }
                }
            }
        }
    }

    fn interrupted(&self, source: ProviderError) -> InferenceError {
        warn!(model = %self.model, error = %source, "Stream interrupted after output began");
        InferenceError::Interrupted {
            model: self.model.clone(),
            source,
        }
    }

    /// The model that is answering.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Usage reported so far, if the provider sent any.
    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Stop consuming and release the connection.
    pub fn close(&mut self) {
        self.pending = None;
        self.rx = None;
    }
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("model", &self.model)
            .field("open", &self.rx.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// What a scripted model does when called.
    #[derive(Clone)]
    enum Script {
        Reply(&'static str),
        Fail(ProviderError),
        /// Fail this many times with a 429, then reply
        ThrottleThen(u32, &'static str),
        Chunks(Vec<Result<&'static str, ProviderError>>),
    }

    struct ScriptedProvider {
        scripts: HashMap<String, Script>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts
                    .iter()
                    .map(|(m, s)| (m.to_string(), s.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn call_count(&self, model: &str) -> usize {
            self.calls().iter().filter(|m| *m == model).count()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let previous = self.call_count(&request.model) as u32;
            self.calls.lock().unwrap().push(request.model.clone());
            let reply = |content: &str| ProviderResponse {
                content: content.to_string(),
                model: request.model.clone(),
                usage: Some(Usage {
                    prompt_tokens: 5,
                    completion_tokens: 1,
                    total_tokens: 6,
                }),
                reasoning_details: None,
            };
            match self.scripts.get(&request.model) {
                Some(Script::Reply(content)) => Ok(reply(content)),
                Some(Script::Fail(e)) => Err(e.clone()),
                Some(Script::ThrottleThen(n, content)) if previous >= *n => Ok(reply(content)),
                Some(Script::ThrottleThen(..)) => Err(ProviderError::RateLimited { retry_after_secs: 0 }),
                Some(Script::Chunks(_)) | None => {
                    Err(ProviderError::ModelNotFound(request.model.clone()))
                }
            }
        }

        async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
            let Some(Script::Chunks(chunks)) = self.scripts.get(&request.model).cloned() else {
                return self.complete(request).await.map(|r| {
                    let (tx, rx) = tokio::sync::mpsc::channel(1);
                    let _ = tx.try_send(Ok(StreamChunk {
                        content: Some(r.content),
                        done: true,
                        usage: None,
                    }));
                    rx
                });
            };
            self.calls.lock().unwrap().push(request.model.clone());
            let (tx, rx) = tokio::sync::mpsc::channel(chunks.len() + 1);
            for chunk in chunks {
                let item = chunk.map(|text| StreamChunk {
                    content: Some(text.to_string()),
                    ..StreamChunk::default()
                });
                let _ = tx.try_send(item);
            }
            Ok(rx)
        }
    }

    fn client(provider: Arc<ScriptedProvider>, models: &[&str]) -> InferenceClient {
        let fallbacks = models[1..].iter().map(|m| m.to_string()).collect();
        InferenceClient::new(provider, CascadeSettings::new(models[0], fallbacks))
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("persona"), ChatMessage::user("hello")]
    }

    async fn collect(stream: &mut FragmentStream) -> (Vec<String>, Option<InferenceError>) {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(text) => out.push(text),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    #[test]
    fn cascade_dedupes_primary_and_repeats() {
        let cascade = ModelCascade::new(
            "b",
            &["a".to_string(), "b".to_string(), "c".to_string(), "a".to_string()],
        );
        assert_eq!(cascade.models(), ["b", "a", "c"]);
    }

    #[test]
    fn requested_model_leads_the_cascade() {
        let provider = ScriptedProvider::new(&[]);
        let client = client(provider, &["default", "fb1", "fb2"]);
        assert_eq!(client.cascade(None).models(), ["default", "fb1", "fb2"]);
        // The default is only a fallback when it is listed as one
        assert_eq!(client.cascade(Some("fb2")).models(), ["fb2", "fb1"]);
        assert_eq!(client.cascade(Some("  ")).models()[0], "default");
    }

    #[test]
    fn failure_classification() {
        use FailureClass::*;
        assert_eq!(classify(&ProviderError::RateLimited { retry_after_secs: 0 }), Retryable);
        assert_eq!(classify(&ProviderError::ModelNotFound("x".into())), Retryable);
        assert_eq!(classify(&ProviderError::Timeout("x".into())), Retryable);
        assert_eq!(
            classify(&ProviderError::ApiError { status_code: 502, message: "x".into() }),
            Retryable
        );
        assert_eq!(classify(&ProviderError::AuthenticationFailed("x".into())), Fatal);
        assert_eq!(classify(&ProviderError::ContextLengthExceeded("x".into())), Fatal);
        assert_eq!(classify(&ProviderError::MalformedResponse("x".into())), Fatal);
        assert_eq!(classify(&ProviderError::Network("x".into())), Fatal);
        assert_eq!(
            classify(&ProviderError::ApiError { status_code: 422, message: "x".into() }),
            Fatal
        );
    }

    #[test]
    fn backoff_doubles_and_honours_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1, 0), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(2, 0), Duration::from_millis(4000));
        assert_eq!(policy.backoff_for(3, 0), Duration::from_millis(8000));
        assert_eq!(policy.backoff_for(1, 10), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(1, 3600), MAX_RETRY_AFTER);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_retryable_failures() {
        let provider = ScriptedProvider::new(&[
            ("A", Script::Fail(ProviderError::RateLimited { retry_after_secs: 0 })),
            ("B", Script::Fail(ProviderError::ModelNotFound("B".into()))),
            ("C", Script::Reply("ok")),
        ]);
        let client = client(provider.clone(), &["A", "B", "C"]);

        let response = client.complete(&messages(), None).await.unwrap();
        assert_eq!(response.model, "C");
        assert_eq!(response.content, "ok");
        // A is throttled on every attempt, B is tried once
        assert_eq!(provider.call_count("A"), 3);
        assert_eq!(provider.call_count("B"), 1);
        assert_eq!(provider.call_count("C"), 1);
        assert_eq!(provider.call_count("D"), 0);
    }

    #[tokio::test]
    async fn fatal_failure_stops_the_cascade() {
        let provider = ScriptedProvider::new(&[
            ("A", Script::Fail(ProviderError::AuthenticationFailed("bad key".into()))),
            ("B", Script::Reply("never")),
        ]);
        let client = client(provider.clone(), &["A", "B"]);

        let err = client.complete(&messages(), None).await.unwrap_err();
        assert!(matches!(err, InferenceError::Fatal { ref model, .. } if model == "A"));
        assert_eq!(provider.calls(), ["A"]);
    }

    #[tokio::test]
    async fn exhausted_cascade_reports_last_failure() {
        let provider = ScriptedProvider::new(&[
            ("A", Script::Fail(ProviderError::ModelNotFound("A".into()))),
            (
                "B",
                Script::Fail(ProviderError::ApiError {
                    status_code: 502,
                    message: "bad gateway".into(),
                }),
            ),
        ]);
        let client = client(provider, &["A", "B"]);

        match client.complete(&messages(), None).await.unwrap_err() {
            InferenceError::Exhausted { attempted, last } => {
                assert_eq!(attempted, ["A", "B"]);
                assert_eq!(last.model(), "B");
                assert!(last.to_string().contains("bad gateway"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_candidate_recovers_within_retry_budget() {
        let provider = ScriptedProvider::new(&[("A", Script::ThrottleThen(2, "finally"))]);
        let client = client(provider.clone(), &["A", "B"]);

        let started = tokio::time::Instant::now();
        let response = client.complete(&messages(), None).await.unwrap();
        assert_eq!(response.content, "finally");
        assert_eq!(provider.call_count("A"), 3);
        assert_eq!(provider.call_count("B"), 0);
        // 2s + 4s of backoff
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn fallback_events_are_published() {
        let provider = ScriptedProvider::new(&[
            ("A", Script::Fail(ProviderError::ModelNotFound("A".into()))),
            ("B", Script::Reply("ok")),
        ]);
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let client = client(provider, &["A", "B"]).with_events(bus);

        client.complete(&messages(), None).await.unwrap();
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ModelFallback { from_model, to_model, .. } => {
                assert_eq!(from_model, "A");
                assert_eq!(to_model, "B");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_hands_off_before_first_fragment() {
        let provider = ScriptedProvider::new(&[
            ("A", Script::Fail(ProviderError::ModelNotFound("A".into()))),
            ("B", Script::Chunks(vec![Ok("Hel"), Ok("lo")])),
        ]);
        let client = client(provider, &["A", "B"]);

        let mut stream = client.stream(&messages(), None).await.unwrap();
        assert_eq!(stream.model(), "B");
        let (fragments, error) = collect(&mut stream).await;
        assert_eq!(fragments, ["Hel", "lo"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn stream_error_after_output_is_terminal() {
        let provider = ScriptedProvider::new(&[
            (
                "A",
                Script::Chunks(vec![
                    Ok("Hel"),
                    Err(ProviderError::StreamInterrupted("connection reset".into())),
                ]),
            ),
            ("B", Script::Chunks(vec![Ok("never")])),
        ]);
        let client = client(provider.clone(), &["A", "B"]);

        let mut stream = client.stream(&messages(), None).await.unwrap();
        let (fragments, error) = collect(&mut stream).await;
        assert_eq!(fragments, ["Hel"]);
        assert!(matches!(error, Some(InferenceError::Interrupted { ref model, .. }) if model == "A"));
        assert!(stream.next().await.is_none());
        assert_eq!(provider.call_count("B"), 0);
    }

    #[tokio::test]
    async fn stream_error_before_output_follows_classification() {
        let provider = ScriptedProvider::new(&[
            (
                "A",
                Script::Chunks(vec![Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "oops".into(),
                })]),
            ),
            ("B", Script::Chunks(vec![Ok("from B")])),
        ]);
        let client = client(provider, &["A", "B"]);

        let mut stream = client.stream(&messages(), None).await.unwrap();
        assert_eq!(stream.model(), "B");
        assert_eq!(stream.next().await.unwrap().unwrap(), "from B");
    }

    #[tokio::test]
    async fn throttle_frame_before_output_hands_off_to_next_model() {
        use crate::openrouter::OpenRouterProvider;
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "A"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"error\":{\"message\":\"Rate limit exceeded\",\"code\":429}}\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "B"})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let provider = OpenRouterProvider::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let mut settings = CascadeSettings::new("A", vec!["B".to_string()]);
        settings.retry = RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
        };
        let client = InferenceClient::new(Arc::new(provider), settings);

        let mut stream = client.stream(&messages(), None).await.unwrap();
        assert_eq!(stream.model(), "B");
        let (fragments, error) = collect(&mut stream).await;
        assert_eq!(fragments, ["ok"]);
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn error_frame_after_output_is_interrupted() {
        let provider = ScriptedProvider::new(&[(
            "A",
            Script::Chunks(vec![
                Ok("Hel"),
                Err(ProviderError::RateLimited { retry_after_secs: 0 }),
            ]),
        )]);
        let client = client(provider, &["A", "B"]);

        let mut stream = client.stream(&messages(), None).await.unwrap();
        let (fragments, error) = collect(&mut stream).await;
        assert_eq!(fragments, ["Hel"]);
        match error {
            Some(InferenceError::Interrupted { model, source }) => {
                assert_eq!(model, "A");
                assert!(source.is_throttle());
            }
            other => panic!("expected Interrupted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_without_fragments_is_empty_success() {
        let provider = ScriptedProvider::new(&[("A", Script::Chunks(vec![]))]);
        let client = client(provider, &["A", "B"]);

        let mut stream = client.stream(&messages(), None).await.unwrap();
        assert_eq!(stream.model(), "A");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn closed_stream_yields_nothing() {
        let provider = ScriptedProvider::new(&[("A", Script::Chunks(vec![Ok("a"), Ok("b")]))]);
        let client = client(provider, &["A"]);

        let mut stream = client.stream(&messages(), None).await.unwrap();
        stream.close();
        assert!(stream.next().await.is_none());
    }
}
