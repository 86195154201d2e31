//! Command-line interface for perftail.
//!
//! Run `perftail` to serve the beacon and live-tail endpoints with defaults,
//! or `perftail --check-config` to validate a configuration file.

use crate::core::config::{BackendKind, ConfigBuilder, LoggingConfig};
use crate::core::{Config, PerfError, Result};
use crate::receiver::BeaconReceiver;
use clap::Parser;
use std::path::PathBuf;

/// Browser performance beacon capture with a shared-memory live tail
#[derive(Parser, Debug)]
#[command(name = "perftail")]
#[command(version, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// HTTP port for beacons and live reads
    #[arg(long, env = "PERFTAIL_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Configuration file path (default: ~/.config/perftail/config.yaml)
    #[arg(short, long, env = "PERFTAIL_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file for aggregates
    #[arg(long, env = "PERFTAIL_DATABASE")]
    pub database: Option<PathBuf>,

    /// Keep aggregates in memory instead of SQLite
    #[arg(long)]
    pub memory_store: bool,

    /// Directory backed by shared memory for the live tail
    #[arg(long, env = "PERFTAIL_SHM_DIR")]
    pub shm_dir: Option<PathBuf>,

    /// Disable live tail mirroring
    #[arg(long)]
    pub no_live: bool,

    /// Publish Web-Vitals gauges
    #[arg(long, env = "PERFTAIL_METRICS")]
    pub metrics: bool,

    /// Enable debug logging
    #[arg(short, long, env = "PERFTAIL_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// Show version information
    #[arg(short = 'V', long = "show-version")]
    pub version: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Default configuration file location
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("perftail").join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/perftail/config.yaml"))
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    ///
    /// Returns the file the configuration was read from, if any.
    pub async fn load_config(&self) -> Result<(Config, Option<PathBuf>)> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => {
                let default_path = Self::default_config_path();
                if !default_path.exists() {
                    return Ok((self.build_config_from_args(builder)?, None));
                }
                default_path
            },
        };

        let source = match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
                Some(config_path)
            },
            Err(e) if self.config.is_some() => {
                return Err(PerfError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            },
            Err(_) => None,
        };

        Ok((self.build_config_from_args(builder)?, source))
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.http_port {
            builder = builder.http_port(port);
        }
        if let Some(path) = &self.database {
            builder = builder.database_path(path.clone());
        }
        if self.memory_store {
            builder = builder.backend(BackendKind::Memory);
        }
        if let Some(dir) = &self.shm_dir {
            builder = builder.shm_dir(dir.clone());
        }
        if self.no_live {
            builder = builder.live_enabled(false);
        }
        if self.metrics {
            builder = builder.metrics_enabled(true);
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging based on configuration.
    ///
    /// `RUST_LOG` wins, then `--debug`, then `PERFTAIL_LOG_LEVEL`, then the
    /// configured level.
    pub fn init_logging(&self, logging: &LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("PERFTAIL_LOG_LEVEL").ok();
        let log_level = if self.debug {
            "debug"
        } else {
            env_log_level.as_deref().unwrap_or(logging.level.as_str())
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = if logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| PerfError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the perftail application.
pub async fn execute(cli: Cli) -> Result<()> {
    if cli.version {
        println!("perftail {}", env!("CARGO_PKG_VERSION"));
        println!("Browser performance beacon capture");
        return Ok(());
    }

    let (config, source) = cli.load_config().await?;
    cli.init_logging(&config.logging)?;
    match &source {
        Some(path) => tracing::info!("Loaded configuration from: {:?}", path),
        None => tracing::debug!("No config file found, using defaults"),
    }

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  HTTP: {}:{}", config.server.bind_address, config.server.http_port);
        println!("  Beacon path: {}", config.server.beacon_path);
        println!("  Live path: {}", config.server.live_path);
        println!("  Backend: {:?} ({})", config.storage.backend, config.storage.database_path.display());
        println!(
            "  Retention: {} days statistics, {} days resources",
            config.statistics_retention_days(),
            config.resources_retention_days()
        );
        println!("  Live tail: {} in {}", config.capture.live_enabled, config.live.shm_dir.display());
        return Ok(());
    }

    start_headless(config).await
}

async fn start_headless(config: Config) -> Result<()> {
    let receiver = tokio::task::spawn_blocking(move || BeaconReceiver::from_config(config)).await??;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Received shutdown signal, stopping...");
    };

    receiver.serve(shutdown).await
}
