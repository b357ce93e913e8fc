//! Turn orchestration — the heart of Pulse.
//!
//! One turn follows a fixed sequence:
//!
//! 1. **Log** the user utterance
//! 2. **Match skills**; a match answers immediately
//! 3. **Build context** (system prompt + history, older history compressed)
//! 4. **Infer** across the model cascade
//! 5. **Persist** the reply
//!
//! [`Session`] runs turns in the background for interactive front ends, and
//! [`build_from_config`] wires everything from an `AppConfig`.

pub mod builder;
pub mod context;
pub mod orchestrator;
pub mod session;
pub mod turn;

pub use builder::build_from_config;
pub use context::{ContextBuilder, ContextSettings, SUMMARY_PREFIX};
pub use orchestrator::{Orchestrator, TurnOptions, TurnStream};
pub use session::{Session, SessionClosed, SessionReply};
pub use turn::{InvalidTransition, Turn, TurnEvent, TurnState};
