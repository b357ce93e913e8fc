//! Wiring an [`Orchestrator`] from configuration.

use crate::context::{ContextBuilder, ContextSettings};
use crate::orchestrator::Orchestrator;
use pulse_config::AppConfig;
use pulse_core::compressor::Compressor;
use pulse_core::error::Error;
use pulse_core::event::EventBus;
use pulse_memory::SqliteStore;
use pulse_providers::{CascadeSettings, HttpCompressor, InferenceClient, OpenRouterProvider};
use pulse_security::Cipher;
use std::sync::Arc;
use tracing::info;

/// Build a ready-to-use orchestrator.
///
/// Opens (or creates) the SQLite log, encrypted when a key is configured,
/// and attaches the compressor only when it has an API key. Any missing or
/// invalid setting is a `Configuration` error.
pub async fn build_from_config(config: &AppConfig) -> Result<Orchestrator, Error> {
    config.ensure_ready()?;
    config.ensure_directories()?;

    let cipher = config
        .memory
        .encryption_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .map(Cipher::from_config_value)
        .transpose()?;
    let encrypted = cipher.is_some();

    let store = Arc::new(SqliteStore::open(&config.memory.db_path, cipher).await?);
    let events = Arc::new(EventBus::default());

    let provider = OpenRouterProvider::from_config(config)
        .map_err(|e| Error::configuration(e.to_string()))?;
    let inference = InferenceClient::new(
        Arc::new(provider),
        CascadeSettings::from_config(&config.inference),
    )
    .with_events(events.clone());

    let mut context = ContextBuilder::new(store.clone(), ContextSettings::from_config(&config.context))
        .with_events(events.clone());
    let compressor = HttpCompressor::from_config(&config.compressor)
        .map_err(|e| Error::configuration(e.to_string()))?;
    let compressing = compressor.is_some();
    if let Some(compressor) = compressor {
        context = context.with_compressor(Arc::new(compressor) as Arc<dyn Compressor>);
    }

    let skills = pulse_skills::default_registry();
    info!(
        db = %config.memory.db_path.display(),
        encrypted,
        compressing,
        model = %config.inference.default_model,
        skills = ?skills.names(),
        "Pulse core ready"
    );

    Ok(Orchestrator::new(store, context, inference, skills).with_events(events))
}
