//! Main application entry point for the relay server
//!
//! Provides CLI interface, configuration loading, and server startup over the
//! TCP transport.

mod cli;
mod config;
mod logging;
mod signals;
mod tcp;

use anyhow::{Context, Result};
use clap::Parser;
use cli::CliArgs;
use config::AppConfig;
use relay_server::{event_channel, spawn, IncomingMessage, RelayServer, ServerHandle};
use std::sync::Arc;
use tcp::TcpTransport;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Liveness probe: answered with [`PONG`] carrying the same payload.
pub const PING: u16 = 1;
pub const PONG: u16 = 2;

/// Registers the handlers every relay instance serves.
fn register_builtin_handlers(handle: &ServerHandle) {
    handle.register_handler(PING, |message: IncomingMessage| {
        message.reply_bytes(PONG, message.payload());
        Ok(())
    });
}

/// Main application struct
pub struct Application {
    config: AppConfig,
    handle: ServerHandle,
    server_task: JoinHandle<()>,
}

impl Application {
    /// Loads configuration, installs logging and spawns the server task.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config).await?;
        config.apply_args(&args);
        config.validate().context("Configuration validation failed")?;

        logging::setup_logging(&config.logging)?;

        let (events_tx, events_rx) = event_channel();
        let transport = Arc::new(TcpTransport::new(
            config.listen_addr()?,
            config.server.max_frame_size,
            events_tx,
        ));
        let server = RelayServer::new(config.to_server_config(), transport);
        let (handle, server_task) = spawn(server, events_rx);
        register_builtin_handlers(&handle);

        info!("🚀 Relay Server v{}", env!("CARGO_PKG_VERSION"));
        info!("📂 Config: {}", args.config.display());

        Ok(Self {
            config,
            handle,
            server_task,
        })
    }

    /// Runs until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Listen address: {}", self.config.server.listen_addr);
        info!("  ⏱️ Callback timeout: {}ms", self.config.server.callback_timeout_ms);
        info!("  🕒 Sweep interval: {}ms", self.config.server.tick_interval_ms);
        info!("  📦 Max frame size: {} bytes", self.config.server.max_frame_size);

        if !self.config.server.auto_start {
            self.handle.start().await.context("Failed to start relay server")?;
        }

        let monitoring_handle = {
            let handle = self.handle.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    match handle.stats().await {
                        Ok(stats) => info!(
                            "📊 {} connection(s) | {} pending callback(s) | {} active broadcast(s)",
                            stats.connections, stats.pending_callbacks, stats.active_broadcasts
                        ),
                        Err(_) => break,
                    }
                }
            })
        };

        info!("✅ Relay server is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let signal = signals::wait_for_shutdown_signal().await?;
        info!("🛑 {} received, initiating graceful shutdown...", signal);

        monitoring_handle.abort();
        let handle = self.handle;
        let server_task = self.server_task;
        let graceful = async move {
            if let Err(e) = handle.shutdown().await {
                error!("❌ Server task ended before shutdown: {}", e);
            }
            if let Err(e) = server_task.await {
                error!("❌ Server task panicked: {}", e);
            }
        };

        tokio::select! {
            _ = graceful => {}
            second = signals::wait_for_shutdown_signal() => {
                let code = second.map(|signal| signal.exit_code()).unwrap_or(1);
                warn!("⚠️ Second signal during shutdown, exiting immediately");
                std::process::exit(code);
            }
        }

        info!("✅ Relay server shutdown complete");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_server::{codec, ServerConfig, Transport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::{timeout, Duration};

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let length = stream.read_u32().await.unwrap();
        let mut frame = vec![0u8; length as usize];
        stream.read_exact(&mut frame).await.unwrap();
        frame
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ping_over_tcp() {
        let (events_tx, events_rx) = event_channel();
        let transport = Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap(), 4096, events_tx));
        let server = RelayServer::new(ServerConfig::default(), transport.clone());
        let (handle, task) = spawn(server, events_rx);
        register_builtin_handlers(&handle);

        // The server task starts the transport; wait for it to bind.
        let addr = timeout(Duration::from_secs(2), async {
            loop {
                if let Some(addr) = transport.local_addr() {
                    return addr;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let ping = codec::encode(PING, 42, b"are you there");
        client.write_u32(ping.len() as u32).await.unwrap();
        client.write_all(&ping).await.unwrap();

        let frame = timeout(Duration::from_secs(2), read_frame(&mut client)).await.unwrap();
        let (msg_type, correlation_id, payload) = codec::decode(&frame).unwrap();
        assert_eq!(msg_type, PONG);
        assert_eq!(correlation_id, 42);
        assert_eq!(payload, b"are you there");
        assert_eq!(handle.connection_count().await.unwrap(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(!transport.is_active());
    }

    #[tokio::test]
    async fn test_server_restarts_on_fixed_address() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let (events_tx, _events_rx) = event_channel();
        let transport = Arc::new(TcpTransport::new(addr, 4096, events_tx));
        let mut server = RelayServer::new(ServerConfig::default(), transport.clone());

        server.start().unwrap();
        let first_session = server.host_id();
        server.stop();
        server.start().unwrap();

        assert!(server.is_listening());
        assert_ne!(server.host_id(), first_session);
        assert_eq!(transport.local_addr(), Some(addr));
        server.stop();
    }
}
