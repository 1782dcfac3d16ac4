//! Command-line interface handling for the relay server.

use clap::Parser;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Every option overrides the matching value from the configuration file.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Callback-correlated TCP relay server", long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Listen address override, e.g. "0.0.0.0:7777"
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config.toml"),
            listen: None,
            debug: false,
            json_logs: false,
        }
    }
}
