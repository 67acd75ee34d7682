//! Configuration loading and typed config structures for streamhub.
//!
//! The canonical configuration lives in `streamhub-config.yaml` at the
//! project root. Every field has a default, so an empty file (or no file)
//! yields a working single-node setup against `redis://localhost:6379`.
//!
//! Environment variables override YAML values:
//! - `REDIS_URL` overrides `store.url`
//! - `STREAMHUB_STORE` overrides `store.backend` (`redis` or `memory`)
//! - `STREAMHUB_PREFIX` overrides `hub.prefix`
//! - `STREAMHUB_PORT` overrides `gateway.port`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use streamhub_store::ReconnectOptions;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamhubConfig {
    /// Backing store selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Hub settings (namespace, readiness, retry).
    #[serde(default)]
    pub hub: HubConfig,

    /// WebSocket gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StreamhubConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("REDIS_URL") {
            self.store.url = url;
        }
        if let Some(backend) = lookup("STREAMHUB_STORE") {
            match backend.to_ascii_lowercase().as_str() {
                "redis" => self.store.backend = StoreBackend::Redis,
                "memory" => self.store.backend = StoreBackend::Memory,
                other => tracing::warn!(value = other, "ignoring unknown STREAMHUB_STORE"),
            }
        }
        if let Some(prefix) = lookup("STREAMHUB_PREFIX") {
            self.hub.prefix = prefix;
        }
        if let Some(port) = lookup("STREAMHUB_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(e) => tracing::warn!(value = %port, error = %e, "ignoring invalid STREAMHUB_PORT"),
            }
        }
    }
}

/// Which backend holds keys and streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// A Redis-compatible server (Redis, `Dragonfly`, ...).
    #[default]
    Redis,
    /// In-process maps; data is lost on exit.
    Memory,
}

/// Backing store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis URL (`redis://host:port[/db]`), used by the Redis backend.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Reconnect attempts after a dropped connection; `0` retries forever.
    #[serde(default)]
    pub reconnect_max_attempts: u32,

    /// First reconnect delay, in milliseconds.
    #[serde(default = "default_reconnect_min_ms")]
    pub reconnect_min_ms: u32,

    /// Cap on the doubling reconnect delay, in milliseconds.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u32,
}

impl StoreConfig {
    /// Reconnect policy for the Redis backend.
    pub const fn reconnect(&self) -> ReconnectOptions {
        ReconnectOptions {
            max_attempts: self.reconnect_max_attempts,
            min_delay_ms: self.reconnect_min_ms,
            max_delay_ms: self.reconnect_max_ms,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            reconnect_max_attempts: 0,
            reconnect_min_ms: default_reconnect_min_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubConfig {
    /// Namespace prepended (with `:`) to every key and stream name.
    #[serde(default)]
    pub prefix: String,

    /// How many times `wait_ready` pings the store before giving up.
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,

    /// Delay between readiness pings, in milliseconds.
    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,

    /// First delay after a failed stream read, in milliseconds.
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Cap on the doubling retry delay, in milliseconds.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl HubConfig {
    /// Default settings under the given prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Delay between readiness pings.
    pub const fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    /// Backoff policy for the subscription read loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        let initial = Duration::from_millis(self.retry_initial_ms.max(1));
        RetryPolicy {
            initial,
            max: Duration::from_millis(self.retry_max_ms).max(initial),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            ready_attempts: default_ready_attempts(),
            ready_interval_ms: default_ready_interval_ms(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

/// Doubling backoff between retries of a failed stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First delay.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl RetryPolicy {
    /// The delay that follows `current`.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        HubConfig::default().retry_policy()
    }
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Bind address.
    #[serde(default = "default_gateway_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Path of the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Frames buffered per connection before pushes wait for the socket.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            ws_path: default_ws_path(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (`info`, `streamhub_core=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_store_url() -> String {
    "redis://localhost:6379".to_owned()
}

const fn default_reconnect_min_ms() -> u32 {
    100
}

const fn default_reconnect_max_ms() -> u32 {
    5_000
}

const fn default_ready_attempts() -> u32 {
    20
}

const fn default_ready_interval_ms() -> u64 {
    100
}

const fn default_retry_initial_ms() -> u64 {
    100
}

const fn default_retry_max_ms() -> u64 {
    5_000
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_gateway_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws".to_owned()
}

const fn default_outbound_buffer() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_owned()
}
