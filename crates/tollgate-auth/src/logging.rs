//! Structured logging setup for services embedding the session engine

use anyhow::Context;
use serde_json::{json, Value};
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// JSON structured output instead of text
    pub json_format: bool,
    pub pretty_print: bool,
    /// Include file and line number information
    pub include_location: bool,
    /// Fields logged once at startup
    pub global_fields: serde_json::Map<String, Value>,
    /// Environment filter (e.g., "tollgate=debug,tollgate::audit=info")
    pub env_filter: Option<String>,
    pub service_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            pretty_print: true,
            include_location: false,
            global_fields: serde_json::Map::new(),
            env_filter: None,
            service_name: None,
        }
    }
}

impl LoggingConfig {
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
            pretty_print: false,
            include_location: false,
            global_fields: Self::env_field("production"),
            env_filter: Some(
                "tollgate_auth=info,tollgate_store=warn,tollgate::audit=info".to_string(),
            ),
            service_name: None,
        }
    }

    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            pretty_print: true,
            include_location: true,
            global_fields: Self::env_field("development"),
            env_filter: Some(
                "tollgate_auth=debug,tollgate_store=debug,tollgate::audit=info".to_string(),
            ),
            service_name: None,
        }
    }

    /// Minimal output for test runs
    pub fn test() -> Self {
        Self {
            level: "error".to_string(),
            json_format: false,
            pretty_print: false,
            include_location: false,
            global_fields: Self::env_field("test"),
            env_filter: Some("tollgate_auth=error,tollgate_store=error".to_string()),
            service_name: None,
        }
    }

    fn env_field(env: &str) -> serde_json::Map<String, Value> {
        let mut fields = serde_json::Map::new();
        fields.insert("env".to_string(), json!(env));
        fields
    }

    pub fn with_global_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.global_fields.insert(key.into(), value.into());
        self
    }

    pub fn with_service(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive used when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured filter. Fails if a subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))
        .context("invalid log filter")?;

    let layer = Layer::new()
        .with_writer(io::stdout)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_format {
        registry.with(layer.json()).try_init()
    } else if config.pretty_print {
        registry.with(layer.pretty()).try_init()
    } else {
        registry.with(layer).try_init()
    }
    .context("logging already initialized")?;

    let mut init_msg = json!({
        "message": "structured logging initialized",
        "level": config.level,
        "json_format": config.json_format,
    });
    if let Some(name) = config.service_name {
        init_msg["service_name"] = json!(name);
    }
    for (key, value) in config.global_fields {
        init_msg[key] = value;
    }
    tracing::info!(target: "tollgate::logging", "{}", init_msg);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let production = LoggingConfig::production();
        assert!(production.json_format);
        assert_eq!(production.global_fields["env"], json!("production"));

        let development = LoggingConfig::development();
        assert!(development.pretty_print);
        assert!(development.include_location);

        assert_eq!(LoggingConfig::test().level, "error");
    }

    #[test]
    fn test_filter_directive_falls_back_to_level() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter_directive(), "info");

        let config = config.with_env_filter("tollgate_auth=trace").with_service("gateway");
        assert_eq!(config.filter_directive(), "tollgate_auth=trace");
        assert_eq!(config.service_name.as_deref(), Some("gateway"));
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(LoggingConfig::test());
        assert!(init_logging(LoggingConfig::test()).is_err());
    }
}
