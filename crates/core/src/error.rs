//! Error types for the Pulse domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! A failed turn surfaces exactly one of [`StorageError`] or [`InferenceError`];
//! [`ContextOptimizationError`] is always recovered before it reaches a caller.

use thiserror::Error;

/// The top-level error type for all Pulse operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Compressor errors ---
    #[error("{0}")]
    ContextOptimization(#[from] ContextOptimizationError),

    // --- Inference errors ---
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a single completion provider call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Explicit throttling or overload reported by the transport.
    pub fn is_throttle(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::ApiError { status_code: 503, .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("failed to initialize schema: {0}")]
    Migration(String),

    #[error("failed to save message: {0}")]
    Write(String),

    #[error("failed to query messages: {0}")]
    Query(String),

    #[error("failed to encode message: {0}")]
    Serialization(String),
}

/// The single failure kind a compressor may report.
#[derive(Debug, Clone, Error)]
#[error("Context optimization failed: {0}")]
pub struct ContextOptimizationError(pub String);

impl ContextOptimizationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Outcome of an inference call that did not produce a reply.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The candidate failed in a way another model may not.
    #[error("model {model} failed (retryable): {source}")]
    Retryable {
        model: String,
        #[source]
        source: ProviderError,
    },

    /// Switching models will not help; the cascade stops here.
    #[error("model {model} failed: {source}")]
    Fatal {
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("All models failed ({}). Last error: {last}", .attempted.join(", "))]
    Exhausted {
        attempted: Vec<String>,
        last: Box<InferenceError>,
    },

    /// A stream broke after fragments were already delivered.
    #[error("stream from {model} interrupted: {source}")]
    Interrupted {
        model: String,
        #[source]
        source: ProviderError,
    },
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Retryable { .. })
    }

    /// The model the failure is attributed to. For an exhausted cascade this
    /// is the last candidate tried.
    pub fn model(&self) -> &str {
        match self {
            InferenceError::Retryable { model, .. }
            | InferenceError::Fatal { model, .. }
            | InferenceError::Interrupted { model, .. } => model,
            InferenceError::Exhausted { last, .. } => last.model(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 502,
            message: "Bad gateway".into(),
        };
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("Bad gateway"));
    }

    #[test]
    fn throttle_signals() {
        assert!(ProviderError::RateLimited { retry_after_secs: 1 }.is_throttle());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into()
            }
            .is_throttle()
        );
        assert!(!ProviderError::ModelNotFound("x".into()).is_throttle());
        assert!(!ProviderError::Timeout("x".into()).is_throttle());
    }

    #[test]
    fn exhausted_names_every_candidate_and_last_error() {
        let err = InferenceError::Exhausted {
            attempted: vec!["a".into(), "b".into()],
            last: Box::new(InferenceError::Retryable {
                model: "b".into(),
                source: ProviderError::ModelNotFound("b".into()),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("a, b"));
        assert!(text.contains("Model not found: b"));
        assert_eq!(err.model(), "b");
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_error_wraps_into_top_level() {
        let err: Error = StorageError::Write("disk full".into()).into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn configuration_error_message() {
        let err = Error::configuration("OPENROUTER_API_KEY is required");
        assert_eq!(
            err.to_string(),
            "Configuration error: OPENROUTER_API_KEY is required"
        );
    }
}
