//! JSONL export of the conversation log.
//!
//! One JSON object per line: `{"role", "content", "timestamp", "metadata"}`,
//! oldest first, content already decrypted. Intended for building
//! fine-tuning datasets from past sessions.

use pulse_core::conversation::ConversationStore;
use pulse_core::error::StorageError;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Upper bound on messages read for one export.
pub const EXPORT_LIMIT: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Write the store's history to `writer`. Returns the number of lines written.
pub async fn export_jsonl<W: Write>(
    store: &dyn ConversationStore,
    writer: &mut W,
) -> Result<usize, ExportError> {
    let messages = store.history(EXPORT_LIMIT).await?;
    for message in &messages {
        serde_json::to_writer(&mut *writer, message)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(messages.len())
}

/// Export to a file, creating parent directories as needed.
pub async fn export_jsonl_to_path(
    store: &dyn ConversationStore,
    path: &Path,
) -> Result<usize, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    let count = export_jsonl(store, &mut writer).await?;
    info!(count, "Exported conversation history to {}", path.display());
    Ok(count)
}
