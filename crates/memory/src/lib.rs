//! Conversation store implementations for Pulse.

pub mod export;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use export::{EXPORT_LIMIT, ExportError, export_jsonl, export_jsonl_to_path};
pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
