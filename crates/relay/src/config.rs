//! Configuration management for the relay server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use crate::cli::CliArgs;
use anyhow::{bail, Context, Result};
use relay_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls the listen address, frame limits and the dispatch timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:7777")
    pub listen_addr: String,
    /// How long tracked requests and broadcasts wait for answers, in milliseconds
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_ms: u64,
    /// Interval between timeout sweeps, in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Largest inbound frame accepted from a client, in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Start listening as soon as the process is up
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_callback_timeout() -> u64 {
    30_000
}

fn default_tick_interval() -> u64 {
    50
}

fn default_max_frame_size() -> usize {
    1024 * 1024
}

fn default_auto_start() -> bool {
    true
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listen_addr: "127.0.0.1:7777".to_string(),
                callback_timeout_ms: default_callback_timeout(),
                tick_interval_ms: default_tick_interval(),
                max_frame_size: default_max_frame_size(),
                auto_start: default_auto_start(),
            },
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write default config to {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(listen) = &args.listen {
            self.server.listen_addr = listen.clone();
        }
        if args.debug {
            self.logging.level = "debug".to_string();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.parse::<SocketAddr>().is_err() {
            bail!("Invalid listen address: {}", self.server.listen_addr);
        }
        if self.server.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than 0");
        }
        if self.server.max_frame_size == 0 {
            bail!("max_frame_size must be greater than 0");
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                VALID_LOG_LEVELS
            );
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.server.listen_addr))
    }

    /// Converts to the dispatch core's configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            callback_timeout_ms: self.server.callback_timeout_ms,
            tick_interval_ms: self.server.tick_interval_ms,
            channel: 0,
            auto_start: self.server.auto_start,
        }
    }
}
