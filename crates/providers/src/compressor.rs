//! HTTP context compressor.
//!
//! Sends an older-history transcript plus a relevance anchor to a
//! ScaleDown-style endpoint and returns the condensed text. Every failure
//! is reported as a [`ContextOptimizationError`]; callers degrade to raw
//! history.

use async_trait::async_trait;
use pulse_config::CompressorConfig;
use pulse_core::compressor::{Compressed, Compressor};
use pulse_core::error::ContextOptimizationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct HttpCompressor {
    endpoint: String,
    api_key: String,
    target_model: String,
    rate: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompressRequest<'a> {
    context: &'a str,
    prompt: &'a str,
    model: &'a str,
    scaledown: RateSetting<'a>,
}

#[derive(Debug, Serialize)]
struct RateSetting<'a> {
    rate: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompressResponse {
    #[serde(default)]
    compressed_prompt: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl HttpCompressor {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ContextOptimizationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContextOptimizationError::new(format!("HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            target_model: "gpt-4o".into(),
            rate: "auto".into(),
            client,
        })
    }

    /// `Ok(None)` when no compressor API key is configured.
    pub fn from_config(config: &CompressorConfig) -> Result<Option<Self>, ContextOptimizationError> {
        let Some(api_key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            return Ok(None);
        };
        let compressor = Self::new(
            &config.endpoint,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?
        .with_target_model(&config.target_model)
        .with_rate(&config.rate);
        Ok(Some(compressor))
    }

    pub fn with_target_model(mut self, model: impl Into<String>) -> Self {
        self.target_model = model.into();
        self
    }

    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = rate.into();
        self
    }
}

#[async_trait]
impl Compressor for HttpCompressor {
    fn name(&self) -> &str {
        "scaledown"
    }

    async fn compress(
        &self,
        context: &str,
        anchor: &str,
    ) -> Result<Compressed, ContextOptimizationError> {
        let body = CompressRequest {
            context,
            prompt: anchor,
            model: &self.target_model,
            scaledown: RateSetting { rate: &self.rate },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ContextOptimizationError::new(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ContextOptimizationError::new(format!(
                "status {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        let parsed: CompressResponse = response
            .json()
            .await
            .map_err(|e| ContextOptimizationError::new(format!("invalid response: {e}")))?;

        let content = parsed
            .compressed_prompt
            .or(parsed.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ContextOptimizationError::new("empty compression result"))?;

        debug!(
            original_chars = context.chars().count(),
            compressed_chars = content.chars().count(),
            "Context compressed"
        );
        Ok(Compressed { content })
    }
}
