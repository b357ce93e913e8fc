//! Configuration loading, validation, and management for Pulse.
//!
//! Loads configuration from `~/.pulse/config.toml` with environment
//! variable overrides. Validates all settings at startup; the resulting
//! value is immutable and handed by reference to whatever needs it.

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use logging::init_tracing;

/// The default persona used when a turn supplies no system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Pulse, a helpful, intelligent, and efficient AI assistant.";

/// The root configuration structure.
///
/// Maps directly to `~/.pulse/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Completion provider API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible completion endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sent as `X-Title`
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Sent as `HTTP-Referer`
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Model cascade and transport settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Conversation store configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Context assembly policy
    #[serde(default)]
    pub context: ContextConfig,

    /// Optional history compressor
    #[serde(default)]
    pub compressor: CompressorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_app_name() -> String {
    "Pulse AI Ecosystem".into()
}
fn default_app_url() -> String {
    "https://pulse-ai.local".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("app_name", &self.app_name)
            .field("app_url", &self.app_url)
            .field("inference", &self.inference)
            .field("memory", &self.memory)
            .field("context", &self.context)
            .field("compressor", &self.compressor)
            .field("logging", &self.logging)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Tried in order after the primary model
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,

    /// Per-attempt transport timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Ask models for their reasoning trace
    #[serde(default = "default_true")]
    pub enable_reasoning: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_model() -> String {
    "arcee-ai/trinity-large-preview:free".into()
}
fn default_fallback_models() -> Vec<String> {
    vec![
        "google/gemini-2.0-flash-exp:free".into(),
        "google/gemini-2.0-pro-exp-02-05:free".into(),
        "mistralai/mistral-7b-instruct:free".into(),
    ]
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            fallback_models: default_fallback_models(),
            request_timeout_secs: default_request_timeout(),
            enable_reasoning: true,
            temperature: None,
            max_tokens: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Transport-level retry on throttling, within one cascade candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Doubles after every throttled attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    2000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// SQLite database file, or `:memory:`
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Base64 AES-256 key or passphrase; absent means plaintext storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

fn default_db_path() -> PathBuf {
    AppConfig::config_dir().join("pulse_data.db")
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            encryption_key: None,
        }
    }
}

impl std::fmt::Debug for MemoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConfig")
            .field("db_path", &self.db_path)
            .field("encryption_key", &redact(&self.encryption_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_true")]
    pub enable_optimization: bool,

    /// Messages fetched from the store per turn
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Most recent messages always sent uncompressed
    #[serde(default = "default_raw_tail")]
    pub raw_tail: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_history_window() -> usize {
    20
}
fn default_raw_tail() -> usize {
    4
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enable_optimization: true,
            history_window: default_history_window(),
            raw_tail: default_raw_tail(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// No key, no compressor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_compressor_endpoint")]
    pub endpoint: String,

    /// Model the compressed text is tuned for
    #[serde(default = "default_target_model")]
    pub target_model: String,

    #[serde(default = "default_rate")]
    pub rate: String,

    #[serde(default = "default_compressor_timeout")]
    pub timeout_secs: u64,
}

fn default_compressor_endpoint() -> String {
    "https://api.scaledown.xyz/compress/raw".into()
}
fn default_target_model() -> String {
    "gpt-4o".into()
}
fn default_rate() -> String {
    "auto".into()
}
fn default_compressor_timeout() -> u64 {
    30
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_compressor_endpoint(),
            target_model: default_target_model(),
            rate: default_rate(),
            timeout_secs: default_compressor_timeout(),
        }
    }
}

impl std::fmt::Debug for CompressorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressorConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("target_model", &self.target_model)
            .field("rate", &self.rate)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.pulse/config.toml).
    ///
    /// Environment variables override file values:
    /// - `OPENROUTER_API_KEY`, `PULSE_BASE_URL`
    /// - `PULSE_DEFAULT_MODEL`, `PULSE_FALLBACK_MODELS` (comma separated)
    /// - `PULSE_DB_PATH`, `PULSE_ENCRYPTION_KEY`
    /// - `SCALEDOWN_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = get("PULSE_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = get("PULSE_DEFAULT_MODEL") {
            self.inference.default_model = model;
        }
        if let Some(list) = get("PULSE_FALLBACK_MODELS") {
            self.inference.fallback_models = list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(path) = get("PULSE_DB_PATH") {
            self.memory.db_path = PathBuf::from(path);
        }
        if let Some(key) = get("PULSE_ENCRYPTION_KEY") {
            self.memory.encryption_key = Some(key);
        }
        if let Some(key) = get("SCALEDOWN_API_KEY") {
            self.compressor.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pulse")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "inference.default_model must not be empty".into(),
            ));
        }

        if self.inference.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "inference.request_timeout_secs must be > 0".into(),
            ));
        }

        if self.inference.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "inference.retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.context.history_window == 0 || self.context.raw_tail == 0 {
            return Err(ConfigError::ValidationError(
                "context.history_window and context.raw_tail must be > 0".into(),
            ));
        }

        if self.context.raw_tail > self.context.history_window {
            return Err(ConfigError::ValidationError(format!(
                "context.raw_tail ({}) cannot exceed context.history_window ({})",
                self.context.raw_tail, self.context.history_window
            )));
        }

        if self.compressor.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "compressor.timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Validate, and require everything a live session needs.
    pub fn ensure_ready(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if !self.has_api_key() {
            return Err(ConfigError::ValidationError(
                "OPENROUTER_API_KEY is required".into(),
            ));
        }
        Ok(())
    }

    /// Check if a provider API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Create the directory holding the database file.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        let Some(parent) = self.memory.db_path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::DirectoryError {
            path: parent.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            app_name: default_app_name(),
            app_url: default_app_url(),
            inference: InferenceConfig::default(),
            memory: MemoryConfig::default(),
            context: ContextConfig::default(),
            compressor: CompressorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to create directory {path}: {reason}")]
    DirectoryError { path: PathBuf, reason: String },
}

impl From<ConfigError> for pulse_core::Error {
    fn from(err: ConfigError) -> Self {
        pulse_core::Error::configuration(err.to_string())
    }
}
