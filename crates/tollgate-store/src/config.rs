//! Store configuration and builder

use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which backend holds the ephemeral session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            other => Err(StoreError::Configuration(format!(
                "unknown store backend '{}', expected memory or redis",
                other
            ))),
        }
    }
}

/// Store configuration shared by all backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix applied to every key written by the Redis backend
    #[serde(default = "default_key_prefix")]
    pub key_prefix: Option<String>,

    /// Connection timeout
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: Duration,

    /// Per-command timeout
    #[serde(default = "default_command_timeout")]
    pub command_timeout: Duration,
}

fn default_backend() -> BackendKind {
    BackendKind::Memory
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> Option<String> {
    Some("tollgate:".to_string())
}
fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connection_timeout: default_connection_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Load configuration from `TOLLGATE_STORE_*` environment variables
    pub fn from_env() -> Result<Self, StoreError> {
        let mut config = Self::default();

        if let Ok(backend) = env::var("TOLLGATE_STORE_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Ok(url) = env::var("TOLLGATE_REDIS_URL") {
            config.redis_url = url;
        }

        if let Ok(prefix) = env::var("TOLLGATE_STORE_KEY_PREFIX") {
            config.key_prefix = if prefix.is_empty() { None } else { Some(prefix) };
        }

        if let Ok(ms) = env::var("TOLLGATE_STORE_COMMAND_TIMEOUT_MS") {
            let ms = ms.parse::<u64>().map_err(|_| {
                let message = format!("invalid TOLLGATE_STORE_COMMAND_TIMEOUT_MS: {}", ms);
                StoreError::Configuration(message)
            })?;
            config.command_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.command_timeout.is_zero() {
            return Err(StoreError::Configuration("command_timeout must be positive".to_string()));
        }
        if self.backend == BackendKind::Redis && !self.redis_url.starts_with("redis") {
            return Err(StoreError::Configuration(format!(
                "redis_url must use a redis:// or rediss:// scheme, got '{}'",
                self.redis_url
            )));
        }
        Ok(())
    }
}

/// Store configuration builder
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn redis_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.backend = BackendKind::Redis;
        self.config.redis_url = url.into();
        self
    }

    pub fn key_prefix<S: Into<String>>(mut self, prefix: Option<S>) -> Self {
        self.config.key_prefix = prefix.map(|p| p.into());
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
