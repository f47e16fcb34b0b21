//! tcp-runtime echo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ tls::sni (optional) ──▶ pipeline hooks ──▶ echo handler
//!                     │                                                          │
//!                     └──── net::group (live connections) ◀── lifecycle events ──┘
//!
//!     SIGTERM/SIGINT ──▶ DisposableServer::dispose_now ──▶ drain ──▶ release listener
//! ```
//!
//! Every received byte is written back. Behaviour is driven by a TOML config
//! file; a few settings can be overridden from the command line.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tcp_runtime::config::{load_config, validate_config, ConfigError};
use tcp_runtime::lifecycle::signals::shutdown_signal;
use tcp_runtime::observability::{init_logging, install_exporter};
use tcp_runtime::{Connection, ServerConfig, TcpServer};

#[derive(Parser)]
#[command(name = "tcp-runtime")]
#[command(about = "Echo server with SNI-based TLS and graceful shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Log all traffic (visible with RUST_LOG=tcp_runtime::wiretap=trace).
    #[arg(long)]
    wiretap: bool,
}

async fn echo(mut connection: Connection) -> io::Result<()> {
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let n = connection.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        connection.write_all(&buf[..n]).await?;
    }
    connection.shutdown().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = Some(port);
    }
    if cli.wiretap {
        config.observability.wiretap = true;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability.log_level, config.observability.log_format)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tcp-runtime starting");

    tracing::info!(
        listener = ?config.listener,
        secure = config.tls.is_some(),
        drain_timeout_ms = config.shutdown.drain_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        install_exporter(config.observability.metrics_address.parse()?)?;
    }

    let server = TcpServer::from_config(&config)?
        .handle(echo)
        .bind_now(config.listener.bind_timeout())
        .await?;

    tracing::info!(address = %server.local_endpoint(), "Listening for connections");

    shutdown_signal().await;

    match server.dispose_now(config.shutdown.drain_timeout()).await {
        Ok(()) => tracing::info!("Shutdown complete"),
        Err(e) => tracing::warn!(error = %e, "Shutdown finished with errors"),
    }
    Ok(())
}
