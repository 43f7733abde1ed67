//! HTTP bridge for Modbus RTU devices.
//!
//! Opens the serial device, then serves the HTTP API until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use eda_modbus_bridge::config::{BAUD_RATE, DEFAULT_HTTP_PORT};
use eda_modbus_bridge::{BridgeConfig, HttpServer, ModbusAdapter, ModbusDevice};

/// HTTP bridge for Modbus RTU devices.
#[derive(Parser, Debug)]
#[command(name = "eda-modbus-bridge")]
#[command(about = "Exposes a Modbus RTU device over HTTP")]
#[command(version)]
struct Args {
    /// The serial port device to use
    #[arg(value_name = "serialPort")]
    serial_port: String,

    /// The port for the HTTP server to listen on
    #[arg(long = "httpListenPort", default_value_t = DEFAULT_HTTP_PORT)]
    http_listen_port: u16,

    /// Use verbose logging
    #[arg(long)]
    verbose: bool,

    /// Point mapping file (JSON5 format); defaults to the built-in EDA mapping
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BridgeConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => BridgeConfig::builtin().context("Failed to load built-in config")?,
    };

    eda_bridge_common::init_tracing(&config.logging, args.verbose.then_some("debug"))
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting eda-modbus-bridge");
    match &args.config {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("Using built-in point mapping"),
    }

    let device = ModbusDevice::connect_rtu(&args.serial_port, &config.device)
        .with_context(|| format!("Failed to open {}", args.serial_port))?;
    info!(
        port = %args.serial_port,
        baud_rate = BAUD_RATE,
        unit_id = config.device.unit_id,
        "Connected to Modbus device"
    );

    let adapter = Arc::new(ModbusAdapter::new(Box::new(device), &config));
    info!(
        flags = config.flags.len(),
        settings = config.settings.len(),
        readings = config.readings.len(),
        "Point mapping loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listen_addr = SocketAddr::from(([0, 0, 0, 0], args.http_listen_port));
    let http_server = HttpServer::new(adapter.clone(), listen_addr);
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut http_task => {
            // The server only returns on its own when it failed to start or crashed
            adapter.shutdown().await;
            return result.context("HTTP server task panicked")?;
        }
    }

    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(Err(e))) => error!("HTTP server error: {}", e),
        Ok(Err(e)) => error!("HTTP server task failed: {}", e),
        Err(_) => error!("HTTP server did not stop within 5s"),
        Ok(Ok(Ok(()))) => {}
    }

    adapter.shutdown().await;
    info!("Bridge stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
