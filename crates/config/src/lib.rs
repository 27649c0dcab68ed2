//! Configuration loading, validation, and management for kbchat.
//!
//! Loads configuration from `~/.kbchat/config.toml` (or the file named by
//! `KBCHAT_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Vector knowledge base
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,

    /// Signed source links
    #[serde(default)]
    pub links: LinkConfig,

    /// Metadata blob source
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Structured index endpoints
    #[serde(default)]
    pub indexes: IndexConfig,

    /// WebSocket gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session persistence
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Command-line client
    #[serde(default)]
    pub client: ClientConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model used for the streamed answer
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for auxiliary single-shot calls (session titles)
    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_fast_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn default_temperature() -> f32 {
    0.01
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            fast_model: default_fast_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("fast_model", &self.fast_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Inline base system prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Read the base system prompt from this file instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,

    /// Stored exchanges sent to the model with each request
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Model calls allowed per exchange
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock budget for one exchange
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,

    #[serde(default = "default_title_max_tokens")]
    pub title_max_tokens: u32,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer using information retrieved from your \
     knowledge base and cite the documents you rely on. If the retrieved context \
     does not contain the answer, say so instead of guessing."
        .into()
}
fn default_history_window() -> usize {
    2
}
fn default_max_iterations() -> u32 {
    8
}
fn default_exchange_timeout() -> u64 {
    300
}
fn default_title_max_tokens() -> u32 {
    15
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            system_prompt_file: None,
            history_window: default_history_window(),
            max_iterations: default_max_iterations(),
            exchange_timeout_secs: default_exchange_timeout(),
            title_max_tokens: default_title_max_tokens(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Base URL of the retrieval service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub knowledge_base_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for KnowledgeBaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBaseConfig")
            .field("endpoint", &self.endpoint)
            .field("knowledge_base_id", &self.knowledge_base_id)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Public base URL documents are served from
    #[serde(default = "default_link_base")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    #[serde(default = "default_link_expiry")]
    pub expires_secs: u64,
}

fn default_link_base() -> String {
    "http://127.0.0.1:42618/documents".into()
}
fn default_link_expiry() -> u64 {
    3600
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_url: default_link_base(),
            signing_secret: None,
            expires_secs: default_link_expiry(),
        }
    }
}

impl std::fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConfig")
            .field("base_url", &self.base_url)
            .field("signing_secret", &redact(&self.signing_secret))
            .field("expires_secs", &self.expires_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_url: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Accepted bearer tokens. Empty accepts every connection.
    #[serde(default)]
    pub bearer_tokens: Vec<String>,

    /// Persist finished exchanges to the session store
    #[serde(default = "default_true")]
    pub persist_sessions: bool,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            bearer_tokens: Vec::new(),
            persist_sessions: true,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("bearer_tokens", &format!("[{} configured]", self.bearer_tokens.len()))
            .field("persist_sessions", &self.persist_sessions)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// `memory` or `sqlite`
    #[serde(default = "default_session_backend")]
    pub backend: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_session_backend() -> String {
    "memory".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            database_url: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_client_url() -> String {
    "ws://127.0.0.1:42618/ws".into()
}
fn default_idle_timeout() -> u64 {
    90
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            token: None,
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("token", &redact(&self.token))
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default location with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("KBCHAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
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

    /// Environment variables win over the file.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("KBCHAT_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = lookup("KBCHAT_MODEL") {
            self.provider.model = model;
        }
        if let Some(id) = lookup("KBCHAT_KNOWLEDGE_BASE_ID") {
            self.knowledge_base.knowledge_base_id = id;
        }
        if let Some(secret) = lookup("KBCHAT_LINK_SECRET") {
            self.links.signing_secret = Some(secret);
        }
    }

    /// Get the configuration directory path (`~/.kbchat`).
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kbchat")
    }

    /// Resolve the base system prompt, reading `system_prompt_file` if set.
    pub fn base_system_prompt(&self) -> Result<String, ConfigError> {
        match &self.agent.system_prompt_file {
            Some(path) => std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                reason: e.to_string(),
            }),
            None => Ok(self.agent.system_prompt.clone()),
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.history_window > 50 {
            return Err(ConfigError::ValidationError(
                "agent.history_window must be at most 50".into(),
            ));
        }
        match self.sessions.backend.as_str() {
            "memory" => {}
            "sqlite" if self.sessions.database_url.is_some() => {}
            "sqlite" => {
                return Err(ConfigError::ValidationError(
                    "sessions.database_url is required for the sqlite backend".into(),
                ));
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown sessions.backend '{other}'"
                )));
            }
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// A copy safe to print: every secret replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "[REDACTED]".to_string());
        let mut config = self.clone();
        config.provider.api_key = mask(&self.provider.api_key);
        config.knowledge_base.api_key = mask(&self.knowledge_base.api_key);
        config.links.signing_secret = mask(&self.links.signing_secret);
        config.client.token = mask(&self.client.token);
        config.gateway.bearer_tokens = self
            .gateway
            .bearer_tokens
            .iter()
            .map(|_| "[REDACTED]".to_string())
            .collect();
        config
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
