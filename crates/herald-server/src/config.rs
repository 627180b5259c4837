//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Delivery worker settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "herald_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Delivery worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Appservices to run a delivery worker for. One worker per destination.
    #[serde(default)]
    pub destinations: Vec<String>,

    /// Maximum number of events pushed in one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between polls of an idle or failing destination, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for a single queue operation, in milliseconds. `0` disables it.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl DeliveryConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-operation deadline, or `None` when disabled.
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_ms > 0).then(|| Duration::from_millis(self.operation_timeout_ms))
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    7800
}

fn default_db_path() -> String {
    "herald.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            destinations: Vec::new(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value was syntactically valid but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `HERALD_HOST` overrides `server.host`
/// - `HERALD_PORT` overrides `server.port`
/// - `HERALD_DB_PATH` overrides `database.path`
/// - `HERALD_LOG_LEVEL` overrides `logging.level`
/// - `HERALD_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `HERALD_DESTINATIONS` overrides `delivery.destinations` (comma-separated)
/// - `HERALD_BATCH_SIZE` overrides `delivery.batch_size`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration is unusable.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;

    Ok(config)
}

/// Applies `HERALD_*` overrides read through `lookup`.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("HERALD_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("HERALD_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = lookup("HERALD_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = lookup("HERALD_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("HERALD_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(destinations) = lookup("HERALD_DESTINATIONS") {
        config.delivery.destinations = destinations
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(batch_size) = lookup("HERALD_BATCH_SIZE") {
        if let Ok(parsed) = batch_size.parse() {
            config.delivery.batch_size = parsed;
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.delivery.batch_size == 0 {
        return Err(ConfigError::Invalid(
            "delivery.batch_size must be at least 1".to_string(),
        ));
    }
    if config.database.pool_max_size == 0 {
        return Err(ConfigError::Invalid(
            "database.pool_max_size must be at least 1".to_string(),
        ));
    }
    if let Some(blank) = config
        .delivery
        .destinations
        .iter()
        .position(|d| d.trim().is_empty())
    {
        return Err(ConfigError::Invalid(format!(
            "delivery.destinations[{blank}] is empty"
        )));
    }
    // One worker per destination, so each name may appear once.
    let destinations = &config.delivery.destinations;
    for (i, destination) in destinations.iter().enumerate() {
        let name = destination.trim();
        if let Some(first) = destinations[..i].iter().position(|d| d.trim() == name) {
            return Err(ConfigError::Invalid(format!(
                "delivery.destinations[{i}] duplicates delivery.destinations[{first}] ({name})"
            )));
        }
    }
    Ok(())
}
