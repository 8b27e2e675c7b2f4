//! # MAV Proxy
//!
//! Ground-station proxy for MAVLink vehicles.
//!
//! Reads telemetry from one or more vehicle links, records it, forwards it
//! to any number of ground-station outputs and takes operator commands
//! from the console.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mav_proxy::cli::Cli;
use mav_proxy::config::Config;
use mav_proxy::proxy::Proxy;

/// Status the process exits with, however the session ended
const EXIT_STATUS: i32 = 1;

/// Main entry point for MAV Proxy
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse the command line and set up logging
///    - Load the configuration file (if any) and overlay the flags
///    - Open vehicle links, outputs and the telemetry logs
///
/// 2. **Startup**
///    - Load the configured modules
///    - Queue `~/.mavinit.scr`, `<aircraft>/mavinit.scr` and `--cmd`,
///      run once the vehicle has been heard (immediately with `--nowait`)
///
/// 3. **Main Loop**
///    - Route vehicle traffic to outputs, logs and modules
///    - Run console commands as they arrive
///    - Send heartbeats and stream-rate requests, check link health
///
/// 4. **Shutdown**
///    - On `exit`, or Ctrl-C unless `requireexit` is set
///    - Unload modules and close the logs
///
/// # Errors
///
/// Returns error if:
/// - The configuration file cannot be read or is invalid
/// - No vehicle link is configured
/// - The log directory cannot be created
///
/// # Examples
///
/// ```bash
/// mav-proxy --master /dev/ttyUSB0,57600 --out udpout:127.0.0.1:14550 --aircraft Skyhunter
/// ```
///
/// Expected output:
/// ```text
/// INFO mav_proxy: MAV Proxy v0.1.0 starting...
/// INFO mav_proxy::telemetry::session: Logging to Skyhunter/logs/2024-05-01/flight1/flight.tlog
/// Waiting for heartbeat
/// online system 1
/// STABILIZE
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = init_logging(cli.debug_log.as_deref())?;

    info!("MAV Proxy v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    let options = cli.startup_options();
    let mut proxy = Proxy::from_config(&config, &options)?;
    proxy.startup(&config, &options);

    info!("Press Ctrl+C or type 'exit' to quit");
    proxy.run().await;

    drop(guard);
    std::process::exit(EXIT_STATUS);
}

/// Console logging, plus a plain-text copy when `debug_log` is given
fn init_logging(debug_log: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let (file_layer, guard) = match debug_log {
        Some(path) => {
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("--debug-log needs a file name, got {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
