//! Message domain types.
//!
//! A [`Message`] is the unit the conversation log stores: user utterance in,
//! assistant reply out, with optional system notes in between.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// Open string-to-value mapping attached to a message.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key under which a provider's reasoning trace is kept.
pub const REASONING_KEY: &str = "reasoning_details";

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, summaries)
    System,
    /// The end user
    User,
    /// The assistant
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Last timestamp handed out, in microseconds.
static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Seconds since the Unix epoch with microsecond precision.
///
/// Strictly increasing within a process, so messages created one after the
/// other keep that order in a timestamp-ordered log.
pub fn now_timestamp() -> f64 {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_MICROS
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| Some(now.max(last + 1)))
        .unwrap_or(now);
    now.max(previous + 1) as f64 / 1_000_000.0
}

/// A single message in a conversation. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Wall-clock creation time, seconds since the epoch
    pub timestamp: f64,

    /// Model id, latency, usage, reasoning trace, skill name...
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_timestamp(),
            metadata: Metadata::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The provider reasoning trace recorded with this message, if any.
    pub fn reasoning(&self) -> Option<&serde_json::Value> {
        self.metadata.get(REASONING_KEY).filter(|v| !v.is_null())
    }

    /// `ROLE: content`, the line format used for transcripts.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role.as_str().to_uppercase(), self.content)
    }
}
