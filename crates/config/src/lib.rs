//! Configuration loading, validation, and management for replybot.
//!
//! Loads configuration from `~/.replybot/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.replybot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Conversation history storage
    #[serde(default)]
    pub history: HistoryConfig,

    /// Messaging platform credentials
    #[serde(default)]
    pub channel: ChannelConfig,

    /// HTTP server settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Weather tool settings
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenaiCompat,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Upload the system prompt once at startup and reuse it
    #[serde(default = "default_true")]
    pub cache_system_prompt: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_request_timeout_secs() -> u64 {
    20
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_key: None,
            api_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            cache_system_prompt: true,
            cache_ttl_secs: default_cache_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("cache_system_prompt", &self.cache_system_prompt)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Which turns of a completed cycle get persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// The user turn plus the text the user actually saw
    #[default]
    Transcript,
    /// Every model and tool turn of the cycle
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Ceiling on model calls per invocation
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Attempts at committing the history append before giving up
    #[serde(default = "default_append_attempts")]
    pub append_attempts: u32,

    /// Whole-invocation deadline
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Most recent stored turns sent to the model
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Carry on without history when the store is unreachable
    #[serde(default)]
    pub stateless_fallback: bool,

    #[serde(default)]
    pub persist: PersistMode,

    /// Inline system prompt (takes precedence over the file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
}

fn default_max_rounds() -> u32 {
    4
}
fn default_append_attempts() -> u32 {
    3
}
fn default_deadline_secs() -> u64 {
    25
}
fn default_history_window() -> usize {
    30
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            append_attempts: default_append_attempts(),
            deadline_secs: default_deadline_secs(),
            history_window: default_history_window(),
            stateless_fallback: false,
            persist: PersistMode::default(),
            system_prompt: None,
            system_prompt_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    #[default]
    Memory,
    Fs,
    Gcs,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,

    /// Root directory for the `fs` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Bucket for the `gcs` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Object name prefix (e.g., "history/")
    #[serde(default)]
    pub prefix: String,

    /// OAuth access token for the `gcs` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Override the storage API base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for HistoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryConfig")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("access_token", &redact(&self.access_token))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Webhook signing secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_secret: Option<String>,

    /// Bearer token for the reply API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Send plain-text model answers when no reply tool was used
    #[serde(default)]
    pub relay_final_text: bool,
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("channel_secret", &redact(&self.channel_secret))
            .field("channel_access_token", &redact(&self.channel_access_token))
            .field("api_url", &self.api_url)
            .field("relay_final_text", &self.relay_final_text)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherSource {
    #[default]
    OpenMeteo,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default)]
    pub source: WeatherSource,

    /// IANA timezone for forecast dates, or "auto"
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "auto".into()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            source: WeatherSource::default(),
            timezone: default_timezone(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = concat!(
    "You are a friendly assistant in a chat app. ",
    "Answer in the language the user wrote in and keep answers short. ",
    "Use the available tools to look up forecasts and events or to create events. ",
    "When you have your answer, deliver it by calling the reply tool exactly once; ",
    "do not answer in plain text.",
);

impl AppConfig {
    /// Load configuration from the default path (~/.replybot/config.toml).
    ///
    /// Environment variables override the file, see [`AppConfig::apply_env`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply the process environment.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|name| std::env::var(name).ok());
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
    /// - `REPLYBOT_API_KEY` (then `GEMINI_API_KEY` / `OPENAI_API_KEY` by kind)
    /// - `REPLYBOT_MODEL`
    /// - `REPLYBOT_CHANNEL_SECRET`, `REPLYBOT_CHANNEL_ACCESS_TOKEN`
    /// - `REPLYBOT_GCS_TOKEN`
    /// - `REPLYBOT_PORT`
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        let vendor_key = match self.provider.kind {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenaiCompat => "OPENAI_API_KEY",
        };
        if let Some(key) = get("REPLYBOT_API_KEY").or_else(|| {
            if self.provider.api_key.is_none() {
                get(vendor_key)
            } else {
                None
            }
        }) {
            self.provider.api_key = Some(key);
        }

        if let Some(model) = get("REPLYBOT_MODEL") {
            self.provider.model = model;
        }
        if let Some(secret) = get("REPLYBOT_CHANNEL_SECRET") {
            self.channel.channel_secret = Some(secret);
        }
        if let Some(token) = get("REPLYBOT_CHANNEL_ACCESS_TOKEN") {
            self.channel.channel_access_token = Some(token);
        }
        if let Some(token) = get("REPLYBOT_GCS_TOKEN") {
            self.history.access_token = Some(token);
        }
        if let Some(port) = get("REPLYBOT_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring unparsable REPLYBOT_PORT"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".replybot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }
        if self.agent.append_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "agent.append_attempts must be at least 1".into(),
            ));
        }
        if self.agent.deadline_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.deadline_secs must be at least 1".into(),
            ));
        }
        match self.history.backend {
            HistoryBackend::Fs if self.history.path.is_none() => {
                return Err(ConfigError::ValidationError(
                    "history.path is required for the fs backend".into(),
                ));
            }
            HistoryBackend::Gcs if self.history.bucket.is_none() => {
                return Err(ConfigError::ValidationError(
                    "history.bucket is required for the gcs backend".into(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// The system prompt: inline override, then file, then the built-in default.
    pub fn system_prompt(&self) -> Result<String, ConfigError> {
        if let Some(prompt) = &self.agent.system_prompt {
            return Ok(prompt.clone());
        }
        if let Some(path) = &self.agent.system_prompt_file {
            return std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                reason: e.to_string(),
            });
        }
        Ok(DEFAULT_SYSTEM_PROMPT.into())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
