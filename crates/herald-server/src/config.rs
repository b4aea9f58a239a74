//! Server configuration loading from file and environment variables.

use herald_fanout::WorkerSettings;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
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

    /// Fan-out worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Delivery relay settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Reconciliation sweep settings.
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
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

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Fan-out worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent consumer tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per job before exhaustion.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: i64,

    /// Job lease duration, in milliseconds.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: i64,

    /// Polling fallback interval, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl WorkerConfig {
    /// Converts the config section into runtime worker settings.
    pub fn settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            lease_ms: self.lease_ms,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

/// Delivery relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Capacity of the notification broadcast bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

/// Reconciliation sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweep runs, in seconds. 0 disables the sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,

    /// Minimum age of a PENDING record before the sweep re-enqueues it,
    /// in seconds. Must exceed the worst-case retry schedule so the sweep
    /// never races an active job.
    #[serde(default = "default_pending_age_secs")]
    pub pending_age_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "herald_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
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

fn default_concurrency() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    herald_queue::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base_ms() -> i64 {
    herald_queue::DEFAULT_BACKOFF_BASE_MS
}

fn default_lease_ms() -> i64 {
    herald_queue::DEFAULT_LEASE_MS
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_bus_capacity() -> usize {
    herald_relay::DEFAULT_BUS_CAPACITY
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_pending_age_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
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

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            lease_ms: default_lease_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            pending_age_secs: default_pending_age_secs(),
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

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `HERALD_HOST` overrides `server.host`
/// - `HERALD_PORT` overrides `server.port`
/// - `HERALD_DB_PATH` overrides `database.path`
/// - `HERALD_WORKER_CONCURRENCY` overrides `worker.concurrency`
/// - `HERALD_LOG_LEVEL` overrides `logging.level`
/// - `HERALD_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
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

    // Environment variable overrides
    if let Ok(host) = std::env::var("HERALD_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("HERALD_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("HERALD_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(concurrency) = std::env::var("HERALD_WORKER_CONCURRENCY") {
        if let Ok(parsed) = concurrency.parse() {
            config.worker.concurrency = parsed;
        }
    }
    if let Ok(level) = std::env::var("HERALD_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("HERALD_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
