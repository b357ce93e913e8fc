//! # Pulse Core
//!
//! Domain types, collaborator traits, and error definitions for the Pulse
//! assistant core. This crate has **no I/O of its own**; it defines the
//! model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (conversation log, completion provider,
//! compressor, skill) is a trait here. Implementations live in their
//! respective crates, so tests can swap in scripted stand-ins and the
//! orchestrator receives already-constructed handles.

pub mod compressor;
pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod skill;

// Re-export key types at crate root for ergonomics
pub use compressor::{Compressed, Compressor};
pub use conversation::{ConversationStore, DECRYPTION_FAILED, format_transcript};
pub use error::{ContextOptimizationError, Error, InferenceError, ProviderError, Result, StorageError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Metadata, Role, REASONING_KEY};
pub use provider::{ChatMessage, ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use skill::{Skill, SkillRegistry};
