use std::env as std_env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use validator::{Validate, ValidationError};

/// Application configuration.
///
/// Loaded from `config/default.toml`, an optional environment-specific file,
/// and `STOREFRONT_*` environment variable overrides, in that order.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Default tax rate (as decimal, e.g., 0.10 for 10%)
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_tax_rate")]
    pub default_tax_rate: f64,

    /// Flat shipping fee applied to every order, in currency units
    #[serde(default = "default_flat_shipping_fee")]
    #[validate(custom = "validate_shipping_fee")]
    pub flat_shipping_fee: f64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Maximum number of database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Database connect timeout in seconds
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
}

impl AppConfig {
    /// Builds a configuration suitable for tests and embedding.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            default_tax_rate: default_tax_rate(),
            flat_shipping_fee: default_flat_shipping_fee(),
            event_channel_capacity: default_event_channel_capacity(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tax_rate() -> f64 {
    0.10
}

fn default_flat_shipping_fee() -> f64 {
    50.0
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("default_tax_rate");
        err.message = Some("default_tax_rate must be a finite value between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_shipping_fee(fee: f64) -> Result<(), ValidationError> {
    if !fee.is_finite() || fee < 0.0 {
        let mut err = ValidationError::new("flat_shipping_fee");
        err.message = Some("flat_shipping_fee must be a finite non-negative value".into());
        return Err(err);
    }
    Ok(())
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (STOREFRONT_*)
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let env = std_env::var("STOREFRONT_ENV").unwrap_or_else(|_| default_environment());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", env)).required(false))
        .add_source(Environment::with_prefix("STOREFRONT"))
        .set_default("environment", env.clone())?
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(e.to_string()))?;

    Ok(cfg)
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={}", level);
    let filter_directive = std_env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_tax_rate, 0.10);
        assert_eq!(cfg.flat_shipping_fee, 50.0);
    }

    #[test]
    fn tax_rate_out_of_range_is_rejected() {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.default_tax_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_shipping_fee_is_rejected() {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.flat_shipping_fee = -1.0;
        assert!(cfg.validate().is_err());
    }
}
