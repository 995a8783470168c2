//! Configuration loading, validation, and management for ModelGate.
//!
//! Loads configuration from `~/.modelgate/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Provider key for the DeepSeek adapter in `[providers.*]`.
pub const DEEPSEEK: &str = "deepseek";
/// Provider key for the Qwen (DashScope) adapter in `[providers.*]`.
pub const QWEN: &str = "qwen";

/// The root configuration structure.
///
/// Maps directly to `~/.modelgate/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model tried first when a request names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<String>,

    /// Models tried in order after the primary fails
    #[serde(default)]
    pub fallback_models: Vec<String>,

    #[serde(default = "default_true")]
    pub enable_fallback: bool,

    /// Model used by `complete` when no preferred model is set
    #[serde(default = "default_completion_model")]
    pub default_completion_model: String,

    /// Model used by `embed` when no preferred model is set
    #[serde(default = "default_embedding_model")]
    pub default_embedding_model: String,

    /// Retry policy applied inside each adapter
    #[serde(default)]
    pub retry: RetryConfig,

    /// Context assembly limits
    #[serde(default)]
    pub context: ContextConfig,

    /// Provider-specific configurations, keyed by provider
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_true() -> bool {
    true
}
fn default_completion_model() -> String {
    "deepseek-coder".into()
}
fn default_embedding_model() -> String {
    "deepseek-chat".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("preferred_model", &self.preferred_model)
            .field("fallback_models", &self.fallback_models)
            .field("enable_fallback", &self.enable_fallback)
            .field("default_completion_model", &self.default_completion_model)
            .field("default_embedding_model", &self.default_embedding_model)
            .field("retry", &self.retry)
            .field("context", &self.context)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Per-provider settings.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (e.g. a proxy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model list override; empty keeps the adapter's built-in list
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("models", &self.models)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay; doubles on every retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for an assembled context
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,

    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,

    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

fn default_max_context_length() -> usize {
    4000
}
fn default_rag_top_k() -> usize {
    5
}
fn default_max_history_messages() -> usize {
    10
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_length: default_max_context_length(),
            rag_top_k: default_rag_top_k(),
            max_history_messages: default_max_history_messages(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.modelgate/config.toml).
    ///
    /// Environment variables override the file:
    /// - `MODELGATE_PREFERRED_MODEL`
    /// - `DEEPSEEK_API_KEY`
    /// - `DASHSCOPE_API_KEY` (Qwen)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    /// Apply overrides from an environment lookup.
    ///
    /// API keys from the environment only fill in keys the file left unset.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("MODELGATE_PREFERRED_MODEL").filter(|m| !m.is_empty()) {
            self.preferred_model = Some(model);
        }

        for (provider, var) in [(DEEPSEEK, "DEEPSEEK_API_KEY"), (QWEN, "DASHSCOPE_API_KEY")] {
            let entry = self.providers.entry(provider.to_string()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = lookup(var).filter(|k| !k.is_empty());
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".modelgate")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.context.max_context_length == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_context_length must be > 0".into(),
            ));
        }

        if self.context.rag_top_k == 0 {
            return Err(ConfigError::ValidationError(
                "context.rag_top_k must be > 0".into(),
            ));
        }

        if self.retry.max_retries > 10 {
            return Err(ConfigError::ValidationError(
                "retry.max_retries must be at most 10".into(),
            ));
        }

        Ok(())
    }

    /// Settings for one provider, if configured.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preferred_model: None,
            fallback_models: vec![],
            enable_fallback: true,
            default_completion_model: default_completion_model(),
            default_embedding_model: default_embedding_model(),
            retry: RetryConfig::default(),
            context: ContextConfig::default(),
            providers: HashMap::new(),
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
}
