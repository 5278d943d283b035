//! GeoBeacon Server - Standalone headless host for GeoBeacon.
//!
//! Runs the location service as a daemon: a replayed route stands in for the
//! positioning hardware and every relayed update is written to stdout. The
//! service manager controls it with signals:
//!
//! - `SIGHUP` restarts the subscription (re-checking preconditions)
//! - `SIGINT` / `SIGTERM` stop the service and exit

mod config;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use geobeacon_core::{bootstrap_services, LocationMessage};
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::{OutputMode, ServerConfig};

/// GeoBeacon Server - Headless background location streaming.
#[derive(Parser, Debug)]
#[command(name = "geobeacon-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "GEOBEACON_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Replay interval in milliseconds (overrides config file).
    #[arg(short = 'i', long, env = "GEOBEACON_REPLAY_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Output format for relayed updates (overrides config file).
    #[arg(short, long, value_enum, env = "GEOBEACON_OUTPUT")]
    output: Option<OutputMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only relayed updates
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("GeoBeacon Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(interval_ms) = args.interval_ms {
        config.replay.interval_ms = interval_ms;
    }
    if let Some(output) = args.output {
        config.output = output;
    }

    log::info!(
        "Configuration: scope={}, permission_granted={}, satellite={}, network={}, waypoints={}",
        config.permission_scope,
        config.permission_granted,
        config.satellite_enabled,
        config.network_enabled,
        config.replay.waypoints.len()
    );

    let core_config = config.to_core_config();
    let handle = tokio::runtime::Handle::current();
    let services = bootstrap_services(&core_config, handle)
        .map_err(anyhow::Error::msg)
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let relay = tokio::spawn(relay_messages(services.sink.subscribe(), config.output));

    services.commands.start();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut hangup = HangupSignal::install();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = hangup.recv() => {
                log::info!("SIGHUP received, restarting location subscription");
                services.commands.start();
            }
        }
    }

    log::info!("Shutdown signal received, cleaning up...");

    services.commands.stop();
    services.shutdown().await;

    relay.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Writes every relayed message until the channel closes.
async fn relay_messages(mut rx: broadcast::Receiver<LocationMessage>, output: OutputMode) {
    loop {
        match rx.recv().await {
            Ok(message) => emit(&message, output),
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Relay fell behind, skipped {} update(s)", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn emit(message: &LocationMessage, output: OutputMode) {
    match output {
        OutputMode::Json => {
            let line = match serde_json::to_string(message) {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Failed to encode update: {}", e);
                    return;
                }
            };
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{}", line).and_then(|()| stdout.flush()) {
                log::error!("Failed to write update: {}", e);
            }
        }
        OutputMode::Log => log::info!(
            "Location update: {:.6}, {:.6} ({})",
            message.latitude,
            message.longitude,
            match (&message.city, &message.country) {
                (Some(city), Some(country)) => format!("{}, {}", city, country),
                _ => "unknown place".to_string(),
            }
        ),
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Restart requests delivered as SIGHUP. Never fires off unix.
struct HangupSignal {
    #[cfg(unix)]
    inner: Option<signal::unix::Signal>,
}

impl HangupSignal {
    #[cfg(unix)]
    fn install() -> Self {
        let inner = signal::unix::signal(signal::unix::SignalKind::hangup())
            .map_err(|e| log::warn!("Failed to install SIGHUP handler: {}", e))
            .ok();
        Self { inner }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            if inner.recv().await.is_some() {
                return;
            }
            self.inner = None;
        }
        std::future::pending::<()>().await
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}
