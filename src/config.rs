use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://partflow.db?mode=rwc";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
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

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Availability at or below which a stock item is flagged as low
    #[serde(default = "default_low_stock_threshold")]
    #[validate(custom = "validate_low_stock_threshold")]
    pub low_stock_threshold: i64,

    /// Attempt budget for transactions hitting transient store failures
    #[serde(default = "default_txn_retry_max_attempts")]
    #[validate(custom = "validate_txn_retry_max_attempts")]
    pub txn_retry_max_attempts: u32,

    /// Base delay for the exponential retry backoff, in milliseconds
    #[serde(default = "default_txn_retry_base_delay_ms")]
    pub txn_retry_base_delay_ms: u64,

    /// Default page size for paginated listings
    #[serde(default = "default_list_default_limit")]
    pub list_default_limit: u64,

    /// Maximum page size allowed for paginated listings
    #[serde(default = "default_list_max_limit")]
    pub list_max_limit: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
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

fn default_db_idle_timeout_secs() -> u64 {
    300
}

fn default_db_acquire_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_low_stock_threshold() -> i64 {
    5
}

fn default_txn_retry_max_attempts() -> u32 {
    3
}

fn default_txn_retry_base_delay_ms() -> u64 {
    25
}

fn default_list_default_limit() -> u64 {
    20
}

fn default_list_max_limit() -> u64 {
    100
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_low_stock_threshold(threshold: i64) -> Result<(), ValidationError> {
    if threshold < 0 {
        let mut err = ValidationError::new("low_stock_threshold");
        err.message = Some("low_stock_threshold must not be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_txn_retry_max_attempts(attempts: u32) -> Result<(), ValidationError> {
    if attempts == 0 {
        let mut err = ValidationError::new("txn_retry_max_attempts");
        err.message = Some("txn_retry_max_attempts must be at least 1".into());
        return Err(err);
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            low_stock_threshold: default_low_stock_threshold(),
            txn_retry_max_attempts: default_txn_retry_max_attempts(),
            txn_retry_base_delay_ms: default_txn_retry_base_delay_ms(),
            list_default_limit: default_list_default_limit(),
            list_max_limit: default_list_max_limit(),
        }
    }
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Creates a new configuration with defaults for everything but the
    /// database URL and environment. Intended for tests and the CLI.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            ..Self::default()
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Retry policy for pipeline transactions, derived from the knobs above.
    pub fn retry_policy(&self) -> crate::db::RetryPolicy {
        crate::db::RetryPolicy {
            max_attempts: self.txn_retry_max_attempts,
            base_delay: std::time::Duration::from_millis(self.txn_retry_base_delay_ms),
        }
    }

    /// Clamps a requested page size to the configured bounds.
    pub fn clamp_limit(&self, limit: u64) -> u64 {
        if limit == 0 {
            self.list_default_limit
        } else {
            limit.min(self.list_max_limit)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("partflow={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP_*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
