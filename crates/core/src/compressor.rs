//! Compressor trait for the external summarization service.
//!
//! Given an older-history transcript and a relevance anchor (usually the
//! latest message), a compressor returns a shorter text to stand in for it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ContextOptimizationError;

/// Output of a successful compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compressed {
    pub content: String,
}

#[async_trait]
pub trait Compressor: Send + Sync {
    fn name(&self) -> &str;

    /// Any non-success outcome is reported as one opaque error kind.
    async fn compress(
        &self,
        context: &str,
        anchor: &str,
    ) -> std::result::Result<Compressed, ContextOptimizationError>;
}
