//! Configuration loading, validation, and management for PowerNode.
//!
//! Loads configuration from a TOML file (default `powernode.toml`, or the
//! path in `POWERNODE_CONFIG`) with environment variable overrides.
//! Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `powernode.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// AI provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// External MCP tool servers
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,

    /// OneDrive built-in tool settings
    #[serde(default)]
    pub onedrive: OneDriveConfig,

    /// Conversation persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Loop and truncation limits
    #[serde(default)]
    pub limits: LimitsConfig,
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
            .field("server", &self.server)
            .field("provider", &self.provider)
            .field("tool_servers", &self.tool_servers)
            .field("onedrive", &self.onedrive)
            .field("storage", &self.storage)
            .field("limits", &self.limits)
            .finish()
    }
}

/// HTTP server settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// When set, inbound requests (except /health) must carry this bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8090
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_token: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_token", &redact(&self.auth_token))
            .finish()
    }
}

/// AI provider settings (Anthropic Messages API).
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API key; `ANTHROPIC_API_KEY` takes precedence when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Override the API base URL (e.g. for a proxy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Override the default system context entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: None,
            system_prompt: None,
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// One external MCP tool server.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Short id used to qualify tool names (`excel` → `excel__read_range`).
    pub id: String,

    /// JSON-RPC endpoint URL.
    pub url: String,

    /// Sent as `Authorization: Bearer <key>` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sent as `x-n8n-instance-url` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n8n_instance_url: Option<String>,

    /// Sent as `x-supplier-id` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl std::fmt::Debug for ToolServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerConfig")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("n8n_instance_url", &self.n8n_instance_url)
            .field("supplier_id", &self.supplier_id)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// OneDrive built-in tool settings. The built-in tools are registered only
/// when an access token is present.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct OneDriveConfig {
    /// Microsoft Graph access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Drive to operate on; the signed-in user's default drive when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,

    /// Override the Graph base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_base_url: Option<String>,
}

impl OneDriveConfig {
    /// Whether the prerequisite configuration for the built-in tools is present.
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }
}

impl std::fmt::Debug for OneDriveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneDriveConfig")
            .field("access_token", &redact(&self.access_token))
            .field("drive_id", &self.drive_id)
            .field("graph_base_url", &self.graph_base_url)
            .finish()
    }
}

/// Conversation persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" (default), "memory", or "none".
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// SQLite database path.
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Directory for spilled oversized payloads.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,

    /// Serialized conversations larger than this are spilled to a blob file.
    #[serde(default = "default_inline_limit")]
    pub inline_limit_bytes: usize,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}
fn default_storage_path() -> String {
    "powernode.db".into()
}
fn default_blob_dir() -> String {
    "blobs".into()
}
fn default_inline_limit() -> usize {
    64 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
            blob_dir: default_blob_dir(),
            inline_limit_bytes: default_inline_limit(),
        }
    }
}

/// Loop and truncation limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum tool round trips per chat request.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Tool results estimated over this many tokens are reduced.
    #[serde(default = "default_truncation_threshold")]
    pub truncation_token_threshold: usize,

    /// Token estimation heuristic: bytes per token.
    #[serde(default = "default_bytes_per_token")]
    pub bytes_per_token: usize,

    /// Rows kept when sampling an oversized tabular result.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
}

fn default_max_tool_iterations() -> u32 {
    5
}
fn default_truncation_threshold() -> usize {
    50_000
}
fn default_bytes_per_token() -> usize {
    4
}
fn default_sample_rows() -> usize {
    10
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            truncation_token_threshold: default_truncation_threshold(),
            bytes_per_token: default_bytes_per_token(),
            sample_rows: default_sample_rows(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (`powernode.toml`, or the
    /// path in the `POWERNODE_CONFIG` environment variable), then apply
    /// environment variable overrides:
    /// - `ANTHROPIC_API_KEY` → provider.api_key
    /// - `POWERNODE_MODEL` → provider.model
    /// - `POWERNODE_AUTH_TOKEN` → server.auth_token
    /// - `ONEDRIVE_ACCESS_TOKEN` / `ONEDRIVE_DRIVE_ID` → onedrive
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("POWERNODE_CONFIG").unwrap_or_else(|_| "powernode.toml".into());
        Self::load_with_env(Path::new(&path))
    }

    /// Load from a specific file and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Injected so tests can
    /// exercise the overrides without mutating process globals.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = var("POWERNODE_MODEL") {
            self.provider.model = model;
        }
        if let Some(token) = var("POWERNODE_AUTH_TOKEN") {
            self.server.auth_token = Some(token);
        }
        if let Some(token) = var("ONEDRIVE_ACCESS_TOKEN") {
            self.onedrive.access_token = Some(token);
        }
        if let Some(drive) = var("ONEDRIVE_DRIVE_ID") {
            self.onedrive.drive_id = Some(drive);
        }
    }

    /// Load configuration from a specific file path. A missing file yields
    /// the defaults.
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

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.limits.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_tool_iterations must be at least 1".into(),
            ));
        }

        if self.limits.bytes_per_token == 0 {
            return Err(ConfigError::ValidationError(
                "limits.bytes_per_token must be at least 1".into(),
            ));
        }

        match self.storage.backend.as_str() {
            "sqlite" | "memory" | "none" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "storage.backend must be sqlite, memory, or none (got '{other}')"
                )));
            }
        }

        for server in &self.tool_servers {
            if server.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "tool_servers entries need a non-empty id".into(),
                ));
            }
            if server.enabled && server.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "tool server '{}' is enabled but has no url",
                    server.id
                )));
            }
        }

        Ok(())
    }

    /// Tool servers that are enabled.
    pub fn enabled_tool_servers(&self) -> impl Iterator<Item = &ToolServerConfig> {
        self.tool_servers.iter().filter(|s| s.enabled)
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
            server: ServerConfig::default(),
            provider: ProviderConfig::default(),
            tool_servers: vec![],
            onedrive: OneDriveConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
        }
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
