//! Signal handling for graceful server shutdown.
//!
//! The first signal starts a graceful shutdown. A second one while that is in
//! progress makes the process exit with the conventional `128 + signo` code.

use anyhow::{Context, Result};
use std::fmt;
use tokio::signal;
use tracing::info;

/// Termination request received by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT, or Ctrl+C on Windows.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl ShutdownSignal {
    /// Process exit code used when this signal forces an exit.
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Terminate => 143,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Waits for a termination signal and reports which one arrived.
///
/// # Platform Support
///
/// * **Unix platforms**: SIGINT and SIGTERM
/// * **Windows**: Ctrl+C, reported as [`ShutdownSignal::Interrupt`]
pub async fn wait_for_shutdown_signal() -> Result<ShutdownSignal> {
    #[cfg(unix)]
    let received = {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => ShutdownSignal::Interrupt,
            _ = sigterm.recv() => ShutdownSignal::Terminate,
        }
    };

    #[cfg(windows)]
    let received = {
        signal::ctrl_c().await.context("Failed to install Ctrl+C handler")?;
        ShutdownSignal::Interrupt
    };

    info!("📡 Received {}", received);
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names_and_exit_codes() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), 130);
        assert_eq!(ShutdownSignal::Terminate.exit_code(), 143);
    }
}
