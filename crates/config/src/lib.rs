//! Configuration loading, validation, and management for promptgate.
//!
//! Loads configuration from `~/.promptgate/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.promptgate/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible backend
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model used when a request carries no override
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Hide the userinfo part of a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://[REDACTED]{}", &url[..scheme], &url[at..])
        }
        _ => url.to_string(),
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("completion", &self.completion)
            .field("cache", &self.cache)
            .field("rate_limit", &self.rate_limit)
            .field("store", &self.store)
            .field("pipeline", &self.pipeline)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Overall timeout for a single-shot call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Time allowed for the response headers of a streaming call
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout_secs: u64,

    /// Cap on the error body snippet kept from non-2xx responses
    #[serde(default = "default_max_error_body")]
    pub max_error_body_bytes: usize,
}

fn default_request_timeout() -> u64 {
    60
}
fn default_first_byte_timeout() -> u64 {
    30
}
fn default_max_error_body() -> usize {
    64 * 1024
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            first_byte_timeout_secs: default_first_byte_timeout(),
            max_error_body_bytes: default_max_error_body(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    #[default]
    Memory,
    None,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: None,
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url.as_deref().map(redact_url))
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    Redis,
    #[default]
    Local,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub backend: RateLimitBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,

    /// Requests admitted per window and client
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Added to the window when setting the shared key's expiry
    #[serde(default = "default_expiry_buffer")]
    pub expiry_buffer_secs: u64,

    /// Paths that bypass admission entirely
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

fn default_max_requests() -> u32 {
    60
}
fn default_window() -> u64 {
    60
}
fn default_expiry_buffer() -> u64 {
    1
}
fn default_exempt_paths() -> Vec<String> {
    vec!["/health".into()]
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::default(),
            redis_url: None,
            max_requests: default_max_requests(),
            window_secs: default_window(),
            expiry_buffer_secs: default_expiry_buffer(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

impl std::fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url.as_deref().map(redact_url))
            .field("max_requests", &self.max_requests)
            .field("window_secs", &self.window_secs)
            .field("expiry_buffer_secs", &self.expiry_buffer_secs)
            .field("exempt_paths", &self.exempt_paths)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_url")]
    pub url: String,
}

fn default_store_url() -> String {
    "sqlite://promptgate.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("url", &redact_url(&self.url))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Most recent persisted turns kept in context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Prompt length cap, in Unicode scalar values
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_history_limit() -> usize {
    20
}
fn default_max_prompt_chars() -> usize {
    32_000
}
fn default_system_prompt() -> String {
    "You are a helpful educational AI assistant. Provide clear, accurate, and pedagogically sound responses.".into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_prompt_chars: default_max_prompt_chars(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Allowed CORS origins; empty means any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Bearer token to principal id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
            cors_origins: Vec::new(),
            tokens: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("body_limit_bytes", &self.body_limit_bytes)
            .field("cors_origins", &self.cors_origins)
            .field("tokens", &format_args!("[{} REDACTED]", self.tokens.len()))
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.promptgate/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Load from `path` (or the default path), then apply environment
    /// overrides:
    /// - `PROMPTGATE_API_KEY`, `LLM_API_KEY`, `OPENAI_API_KEY` (first set wins)
    /// - `LLM_API_BASE`, `LLM_MODEL`
    /// - `REDIS_URL`, `DATABASE_URL`
    /// - `SERVER_PORT`, `RATE_LIMIT_RPM`, `CACHE_TTL_SECONDS`
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(key) = lookup("PROMPTGATE_API_KEY")
            .or_else(|| lookup("LLM_API_KEY"))
            .or_else(|| lookup("OPENAI_API_KEY"))
        {
            self.api_key = Some(key);
        }

        if let Some(base) = lookup("LLM_API_BASE") {
            self.api_base = base;
        }

        if let Some(model) = lookup("LLM_MODEL") {
            self.default_model = model;
        }

        if let Some(url) = lookup("REDIS_URL") {
            self.cache.redis_url = Some(url.clone());
            self.rate_limit.redis_url = Some(url);
        }

        if let Some(url) = lookup("DATABASE_URL") {
            if url.starts_with("postgres://") || url.starts_with("postgresql://") {
                self.store.backend = StoreBackend::Postgres;
            } else if url.starts_with("sqlite:") {
                self.store.backend = StoreBackend::Sqlite;
            }
            self.store.url = url;
        }

        if let Some(port) = lookup("SERVER_PORT") {
            self.gateway.port = parse_env("SERVER_PORT", &port)?;
        }

        if let Some(rpm) = lookup("RATE_LIMIT_RPM") {
            self.rate_limit.max_requests = parse_env("RATE_LIMIT_RPM", &rpm)?;
        }

        if let Some(ttl) = lookup("CACHE_TTL_SECONDS") {
            self.cache.ttl_secs = parse_env("CACHE_TTL_SECONDS", &ttl)?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".promptgate")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_requests must be > 0".into(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.window_secs must be > 0".into(),
            ));
        }

        if self.pipeline.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.history_limit must be > 0".into(),
            ));
        }

        if self.pipeline.max_prompt_chars == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_prompt_chars must be > 0".into(),
            ));
        }

        if self.completion.first_byte_timeout_secs > self.completion.request_timeout_secs {
            return Err(ConfigError::ValidationError(
                "completion.first_byte_timeout_secs must not exceed request_timeout_secs".into(),
            ));
        }

        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_none() {
            return Err(ConfigError::ValidationError(
                "cache.backend = \"redis\" requires cache.redis_url or REDIS_URL".into(),
            ));
        }

        if self.rate_limit.backend == RateLimitBackend::Redis && self.rate_limit.redis_url.is_none()
        {
            return Err(ConfigError::ValidationError(
                "rate_limit.backend = \"redis\" requires rate_limit.redis_url or REDIS_URL".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            completion: CompletionConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: invalid value '{value}'")))
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
