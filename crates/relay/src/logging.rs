//! Logging system setup and configuration.

use crate::config::LoggingSettings;
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system.
///
/// `RUST_LOG` overrides the configured level when set. Fails if a global
/// subscriber is already installed.
///
/// # Arguments
/// * `settings` - Level and output format from the configuration file
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json_format {
        registry
            .with(fmt::layer().json().with_target(false).with_thread_names(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_installs_global_subscriber_once() {
        let settings = LoggingSettings::default();

        // Nothing else in this binary installs a global subscriber.
        setup_logging(&settings).unwrap();
        assert!(tracing::dispatcher::has_been_set());

        let err = setup_logging(&settings).unwrap_err();
        assert!(err.to_string().starts_with("Failed to initialize logging"));
    }
}
