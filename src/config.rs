//! Configuration management for zrelay
//!
//! Parses TOML configuration files and provides typed access to settings.
//! A parsed `Config` is immutable; hot reload swaps in a new one wholesale.

use crate::error::{AppError, AppResult};
use crate::pool::CredentialSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for any timeout setting, in seconds
const MAX_TIMEOUT_SECONDS: u64 = 600;
/// Upper bound for the retry budget
const MAX_RETRIES_LIMIT: usize = 10;
/// Upper bound for the relay channel
const MAX_CHANNEL_CAPACITY: usize = 4096;
/// Auto refresh more often than this would hammer the sign-in endpoint
const MIN_AUTO_REFRESH_SECONDS: u64 = 60;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: Vec<ModelMapping>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Client authentication
///
/// An empty `api_keys` list rejects every request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Bearer key for the `/admin` API; admin routes are closed when unset
    #[serde(default)]
    pub admin_key: Option<String>,
}

/// Which wire protocol the upstream speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKind {
    /// Z.AI web chat API
    #[default]
    Zai,
    /// Any OpenAI-compatible chat completions endpoint
    Openai,
}

/// Upstream connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub protocol: UpstreamKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Covers connect, headers and the whole streamed body
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Attempts per credential for network errors and 5xx
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
    #[serde(default = "default_keepalive_seconds")]
    pub keepalive_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Frontend build the Z.AI API expects in `x-fe-version`
    #[serde(default = "default_fe_version")]
    pub fe_version: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            protocol: UpstreamKind::default(),
            base_url: default_base_url(),
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_idle_connections: default_max_idle_connections(),
            keepalive_seconds: default_keepalive_seconds(),
            user_agent: default_user_agent(),
            fe_version: default_fe_version(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn default_base_url() -> String {
    "https://chat.z.ai".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_retries() -> usize {
    crate::upstream::retry::DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    crate::upstream::retry::DEFAULT_RETRY_BACKOFF_MS
}

fn default_max_idle_connections() -> usize {
    20
}

fn default_keepalive_seconds() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
    Chrome/138.0.0.0 Safari/537.36"
        .to_string()
}

fn default_fe_version() -> String {
    "prod-fe-1.0.53".to_string()
}

/// Public model id to upstream model mapping
///
/// All fields are private to enforce invariants. Configuration is loaded via
/// deserialization and validated via Config::validate().
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelMapping {
    id: String,
    upstream_id: String,
    /// Display name sent alongside the upstream id (defaults to `id`)
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_owned_by")]
    owned_by: String,
}

impl ModelMapping {
    pub fn new(id: impl Into<String>, upstream_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            upstream_id: upstream_id.into(),
            name: None,
            owned_by: default_owned_by(),
        }
    }

    /// Public id clients send in `model`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Model identifier the upstream understands
    pub fn upstream_id(&self) -> &str {
        &self.upstream_id
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn owned_by(&self) -> &str {
        &self.owned_by
    }
}

fn default_owned_by() -> String {
    "z-ai".to_string()
}

/// Credential selection order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    LeastRecentlyUsed,
    Random,
}

/// Credential pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub selection: SelectionStrategy,
    /// 1 means a credential serves one request at a time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_credential: usize,
    /// How long a request waits for a busy pool before 503
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,
    /// Consecutive failures before a credential is expired
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Tokens older than this are expired at lease time
    #[serde(default)]
    pub token_ttl_seconds: Option<u64>,
    /// Periodically re-sign-in every credential that has secrets
    #[serde(default)]
    pub auto_refresh_interval_seconds: Option<u64>,
    /// Upper bound on one sign-in, connection through response body
    #[serde(default = "default_sign_in_timeout")]
    pub sign_in_timeout_seconds: u64,
    #[serde(default)]
    pub credentials: Vec<CredentialSpec>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            selection: SelectionStrategy::default(),
            max_concurrent_per_credential: default_max_concurrent(),
            lease_timeout_ms: default_lease_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            token_ttl_seconds: None,
            auto_refresh_interval_seconds: None,
            sign_in_timeout_seconds: default_sign_in_timeout(),
            credentials: Vec::new(),
        }
    }
}

impl PoolConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn token_ttl(&self) -> Option<Duration> {
        self.token_ttl_seconds.map(Duration::from_secs)
    }

    pub fn auto_refresh_interval(&self) -> Option<Duration> {
        self.auto_refresh_interval_seconds.map(Duration::from_secs)
    }

    pub fn sign_in_timeout(&self) -> Duration {
        Duration::from_secs(self.sign_in_timeout_seconds)
    }
}

fn default_max_concurrent() -> usize {
    1
}

fn default_lease_timeout_ms() -> u64 {
    5_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_sign_in_timeout() -> u64 {
    30
}

/// Request fields that may be dropped instead of rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DroppableField {
    Tools,
    ToolChoice,
    PresencePenalty,
    FrequencyPenalty,
    Stop,
    N,
    ImageContent,
}

impl DroppableField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::ToolChoice => "tool_choice",
            Self::PresencePenalty => "presence_penalty",
            Self::FrequencyPenalty => "frequency_penalty",
            Self::Stop => "stop",
            Self::N => "n",
            Self::ImageContent => "image_content",
        }
    }
}

/// Request translation policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub droppable_fields: Vec<DroppableField>,
}

/// Stream relay settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Chunks buffered between the upstream reader and the client writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Wrap upstream reasoning in `<think>` tags instead of dropping it
    #[serde(default)]
    pub show_think_tags: bool,
    /// Used when a request omits `stream`
    #[serde(default)]
    pub default_stream: bool,
    #[serde(default = "default_sse_keepalive")]
    pub keepalive_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            show_think_tags: false,
            default_stream: false,
            keepalive_seconds: default_sse_keepalive(),
        }
    }
}

fn default_channel_capacity() -> usize {
    32
}

fn default_sse_keepalive() -> u64 {
    15
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Look up a model mapping by its public id
    pub fn model(&self, id: &str) -> Option<&ModelMapping> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Effective config as JSON with keys, passwords and tokens masked
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);

        if let Some(auth) = value.get_mut("auth") {
            auth["api_keys"] = serde_json::Value::Array(
                self.auth
                    .api_keys
                    .iter()
                    .map(|k| serde_json::Value::String(crate::pool::mask_token(k)))
                    .collect(),
            );
            if self.auth.admin_key.is_some() {
                auth["admin_key"] = serde_json::Value::String("***".to_string());
            }
        }
        if let Some(pool) = value.get_mut("pool") {
            pool["credentials"] = serde_json::Value::Array(
                self.pool
                    .credentials
                    .iter()
                    .map(|c| serde_json::Value::String(c.redacted()))
                    .collect(),
            );
        }

        value
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `from_str()`, but can
    /// also be called explicitly when a config is modified in tests.
    pub fn validate(&self) -> AppResult<()> {
        // Server
        if self.server.host.trim().is_empty() {
            return Err(AppError::Config(
                "server.host cannot be empty (use 0.0.0.0 for all interfaces)".to_string(),
            ));
        }

        // Auth
        if self.auth.api_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(AppError::Config(
                "auth.api_keys cannot contain empty keys".to_string(),
            ));
        }
        if let Some(admin_key) = &self.auth.admin_key
            && admin_key.trim().is_empty()
        {
            return Err(AppError::Config(
                "auth.admin_key cannot be empty; omit it to disable the admin API".to_string(),
            ));
        }

        // Upstream
        let upstream = &self.upstream;
        if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://")
        {
            return Err(AppError::Config(format!(
                "upstream.base_url '{}' is invalid. base_url must start with 'http://' or 'https://'.",
                upstream.base_url
            )));
        }
        validate_timeout("upstream.request_timeout_seconds", upstream.request_timeout_seconds)?;
        validate_timeout("upstream.connect_timeout_seconds", upstream.connect_timeout_seconds)?;
        if upstream.connect_timeout_seconds > upstream.request_timeout_seconds {
            return Err(AppError::Config(format!(
                "upstream.connect_timeout_seconds ({}) cannot exceed upstream.request_timeout_seconds ({})",
                upstream.connect_timeout_seconds, upstream.request_timeout_seconds
            )));
        }
        if upstream.max_retries == 0 || upstream.max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::Config(format!(
                "upstream.max_retries must be between 1 and {}, got {}",
                MAX_RETRIES_LIMIT, upstream.max_retries
            )));
        }
        if upstream.user_agent.trim().is_empty() {
            return Err(AppError::Config(
                "upstream.user_agent cannot be empty".to_string(),
            ));
        }

        // Models
        if self.models.is_empty() {
            return Err(AppError::Config(
                "No models configured. At least one [[models]] entry is required.\n\n\
                Example fix - add to config.toml:\n\
                [[models]]\n\
                id = \"GLM-4.5\"\n\
                upstream_id = \"0727-360B-API\""
                    .to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() || model.upstream_id.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "Model '{}' must have a non-empty id and upstream_id",
                    model.id
                )));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate model id '{}'. Model ids must be unique.",
                    model.id
                )));
            }
        }

        // Pool
        let pool = &self.pool;
        if pool.max_concurrent_per_credential == 0 {
            return Err(AppError::Config(
                "pool.max_concurrent_per_credential must be at least 1".to_string(),
            ));
        }
        if pool.lease_timeout_ms == 0 || pool.lease_timeout_ms > MAX_TIMEOUT_SECONDS * 1000 {
            return Err(AppError::Config(format!(
                "pool.lease_timeout_ms must be between 1 and {}, got {}",
                MAX_TIMEOUT_SECONDS * 1000,
                pool.lease_timeout_ms
            )));
        }
        if pool.failure_threshold == 0 {
            return Err(AppError::Config(
                "pool.failure_threshold must be at least 1".to_string(),
            ));
        }
        if pool.token_ttl_seconds == Some(0) {
            return Err(AppError::Config(
                "pool.token_ttl_seconds must be greater than 0 when set".to_string(),
            ));
        }
        if let Some(interval) = pool.auto_refresh_interval_seconds
            && interval < MIN_AUTO_REFRESH_SECONDS
        {
            return Err(AppError::Config(format!(
                "pool.auto_refresh_interval_seconds must be at least {}, got {}",
                MIN_AUTO_REFRESH_SECONDS, interval
            )));
        }

        validate_timeout("pool.sign_in_timeout_seconds", pool.sign_in_timeout_seconds)?;

        // Relay
        if self.relay.channel_capacity == 0 || self.relay.channel_capacity > MAX_CHANNEL_CAPACITY
        {
            return Err(AppError::Config(format!(
                "relay.channel_capacity must be between 1 and {}, got {}",
                MAX_CHANNEL_CAPACITY, self.relay.channel_capacity
            )));
        }
        if self.relay.keepalive_seconds == 0 {
            return Err(AppError::Config(
                "relay.keepalive_seconds must be greater than 0".to_string(),
            ));
        }

        // Observability
        match self.observability.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(AppError::Config(format!(
                    "observability.log_level '{}' is invalid. \
                    Expected one of: trace, debug, info, warn, error.",
                    other
                )));
            }
        }

        Ok(())
    }
}

fn validate_timeout(field: &str, value: u64) -> AppResult<()> {
    if value == 0 {
        return Err(AppError::Config(format!(
            "{} must be greater than 0",
            field
        )));
    }
    if value > MAX_TIMEOUT_SECONDS {
        return Err(AppError::Config(format!(
            "{} cannot exceed {} seconds, got {}",
            field, MAX_TIMEOUT_SECONDS, value
        )));
    }
    Ok(())
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
