//! Configuration management for perftail.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults

use crate::core::{PerfError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shortest retention accepted for either aggregate table, in days.
pub const MIN_RETENTION_DAYS: u32 = 1;

/// Complete configuration for perftail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Capture flags, sampling and endpoint cutting
    pub capture: CaptureConfig,
    /// Aggregate storage configuration
    pub storage: StorageConfig,
    /// Live tail configuration
    pub live: LiveConfig,
    /// Web-Vitals collation configuration
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP port for beacon ingestion and live reads
    pub http_port: u16,
    /// Bind address
    pub bind_address: IpAddr,
    /// Route receiving beacons
    pub beacon_path: String,
    /// Route serving live tail reads
    pub live_path: String,
    /// Site identifier used when the request carries none
    pub default_site: u32,
}

/// Capability flags and ingestion knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Aggregate navigation and Web-Vital records
    pub page_enabled: bool,
    /// Aggregate resource records
    pub resource_enabled: bool,
    /// Mirror records into the live tail
    pub live_enabled: bool,
    /// Publish collated Web-Vital gauges
    pub metrics_enabled: bool,
    /// Per-mille sampling for every beacon (0..=1000)
    pub page_sample_permille: u16,
    /// Additional per-mille sampling for resource beacons (0..=1000)
    pub resource_sample_permille: u16,
    /// Path segments kept for page endpoints
    pub page_path_cut: usize,
    /// Path segments kept for resource endpoints
    pub resource_path_cut: usize,
    /// Drop records matching the built-in noise patterns
    pub smart_filter: bool,
}

/// Aggregate storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind
    pub backend: BackendKind,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Retention for the statistics table, in days
    pub statistics_retention_days: u32,
    /// Retention for the resources table, in days
    pub resources_retention_days: u32,
}

/// Live tail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Maximum entries held per segment
    pub capacity: usize,
    /// Size of each shared segment in bytes
    pub segment_bytes: usize,
    /// Directory backed by shared memory
    pub shm_dir: PathBuf,
    /// Fixed file whose identity derives the segment keys
    pub anchor: Option<PathBuf>,
    /// Lock acquisition attempts before giving up
    pub lock_attempts: u32,
    /// Pause between lock attempts
    #[serde(with = "humantime_serde")]
    pub lock_retry_interval: Duration,
    /// Entries older than this are dropped on write
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Column width of rendered lines
    pub line_width: usize,
    /// Maximum items returned by one read
    pub max_items: usize,
}

/// Web-Vitals collation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Width of the rolling window
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets and line numbers
    pub structured: bool,
}

/// Aggregate backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Memory,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            capture: CaptureConfig::default(),
            storage: StorageConfig::default(),
            live: LiveConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_port: 8047,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            beacon_path: "/perftail/beacon".to_string(),
            live_path: "/perftail/live".to_string(),
            default_site: 1,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            page_enabled: true,
            resource_enabled: true,
            live_enabled: true,
            metrics_enabled: false,
            page_sample_permille: 1000,
            resource_sample_permille: 1000,
            page_path_cut: 3,
            resource_path_cut: 1,
            smart_filter: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: BackendKind::Sqlite,
            database_path: PathBuf::from("./perftail.db"),
            statistics_retention_days: 30,
            resources_retention_days: 2,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            capacity: 4000,
            segment_bytes: 4 * 1024 * 1024,
            shm_dir: PathBuf::from("/dev/shm"),
            anchor: None,
            lock_attempts: 10,
            lock_retry_interval: Duration::from_millis(5),
            max_age: Duration::from_secs(3600),
            line_width: 120,
            max_items: 500,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            window: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("beacon_path", &self.server.beacon_path),
            ("live_path", &self.server.live_path),
        ] {
            if !path.starts_with('/') {
                return Err(PerfError::config(format!("{} must start with '/', got '{}'", name, path)));
            }
        }

        if self.server.beacon_path == self.server.live_path {
            return Err(PerfError::config(format!(
                "beacon_path and live_path must differ: both set to {}",
                self.server.beacon_path
            )));
        }

        for (name, rate) in [
            ("page_sample_permille", self.capture.page_sample_permille),
            ("resource_sample_permille", self.capture.resource_sample_permille),
        ] {
            if rate > 1000 {
                return Err(PerfError::config(format!("{} must be between 0 and 1000, got {}", name, rate)));
            }
        }

        if self.live.capacity == 0 {
            return Err(PerfError::config("live capacity must be greater than 0"));
        }

        if self.live.max_items == 0 {
            return Err(PerfError::config("live max_items must be greater than 0"));
        }

        if self.live.segment_bytes < 4096 {
            return Err(PerfError::config(format!(
                "segment_bytes must be at least 4096, got {}",
                self.live.segment_bytes
            )));
        }

        if self.live.lock_attempts == 0 {
            return Err(PerfError::config("lock_attempts must be greater than 0"));
        }

        if self.live.line_width < 40 {
            return Err(PerfError::config(format!("line_width must be at least 40, got {}", self.live.line_width)));
        }

        if self.metrics.window.is_zero() {
            return Err(PerfError::config("metrics window must be greater than 0"));
        }

        Ok(())
    }

    /// Statistics retention with the minimum floor applied
    pub fn statistics_retention_days(&self) -> u32 {
        self.storage.statistics_retention_days.max(MIN_RETENTION_DAYS)
    }

    /// Resources retention with the minimum floor applied
    pub fn resources_retention_days(&self) -> u32 {
        self.storage.resources_retention_days.max(MIN_RETENTION_DAYS)
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| PerfError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set HTTP port
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.server.http_port = port;
        self
    }

    /// Set the aggregate backend
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.storage.backend = backend;
        self
    }

    /// Set the SQLite database path
    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.storage.database_path = path;
        self
    }

    /// Set the shared memory directory
    pub fn shm_dir(mut self, path: PathBuf) -> Self {
        self.config.live.shm_dir = path;
        self
    }

    /// Set both sampling rates in per-mille
    pub fn sample_permille(mut self, page: u16, resource: u16) -> Self {
        self.config.capture.page_sample_permille = page;
        self.config.capture.resource_sample_permille = resource;
        self
    }

    /// Toggle live tail mirroring
    pub fn live_enabled(mut self, enable: bool) -> Self {
        self.config.capture.live_enabled = enable;
        self
    }

    /// Toggle gauge publishing
    pub fn metrics_enabled(mut self, enable: bool) -> Self {
        self.config.capture.metrics_enabled = enable;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
