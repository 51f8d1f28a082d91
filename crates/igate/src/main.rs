//! APRS iGate - KISS TNC to APRS-IS gateway
//!
//! Reads AX.25 UI frames from a KISS TCP port, logs them, and relays them
//! to an APRS-IS server until interrupted.

use clap::Parser;
use igate::{
    config::{resolve_config_path, GatewayConfig},
    Forwarder, GatewayError, Result,
};
use igate_core::{KissConnection, RelayClient};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Startup attempts against the KISS port
const KISS_CONNECT_ATTEMPTS: usize = 10;

/// Pause between startup attempts
const KISS_CONNECT_DELAY: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: $IGATE_CONFIG_PATH or igate.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Exit after the first decoded packet
    #[arg(long)]
    once: bool,

    /// Decode and log only; never connect to APRS-IS
    #[arg(long)]
    no_aprsis: bool,

    /// Write a default configuration and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,

    /// Override the configured callsign
    #[arg(long)]
    callsign: Option<String>,

    /// Override the configured APRS-IS passcode
    #[arg(long)]
    passcode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(path) = args.write_default_config {
        GatewayConfig::default().save_to_file(&path)?;
        info!("Default configuration saved to {:?}", path);
        return Ok(());
    }

    let config_path = resolve_config_path(args.config);
    if !config_path.exists() {
        error!(
            "Configuration file {:?} not found; create one with --write-default-config",
            config_path
        );
        return Err(GatewayError::Config(format!(
            "missing config file {}",
            config_path.display()
        )));
    }

    info!("Loading configuration from {:?}", config_path);
    let mut config = GatewayConfig::load_from_file(&config_path)?;

    // Override config with CLI args if provided
    if let Some(callsign) = args.callsign {
        config.station.callsign = callsign;
    }
    if let Some(passcode) = args.passcode {
        config.station.passcode = passcode;
    }
    config.validate()?;

    info!(
        "Connecting to KISS TNC at {}:{}",
        config.kiss.host, config.kiss.port
    );
    let mut tnc = KissConnection::connect_with_retry(
        &config.kiss.host,
        config.kiss.port,
        config.kiss_timeout(),
        KISS_CONNECT_ATTEMPTS,
        KISS_CONNECT_DELAY,
    )
    .await
    .map_err(|e| {
        error!(
            "Unable to connect to KISS TNC at {}:{}: {}",
            config.kiss.host, config.kiss.port, e
        );
        e
    })?;

    let relay = if args.no_aprsis {
        None
    } else {
        info!(
            "Relaying as {} via {}",
            config.station.callsign,
            config.relay_config().server_addr()
        );
        Some(RelayClient::new(config.relay_config()))
    };

    let mut forwarder_config = config.forwarder_config();
    forwarder_config.once = args.once;
    let mut forwarder = Forwarder::new(forwarder_config, relay).with_backoff(config.backoff()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Error waiting for shutdown signal: {}", err),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Listening for frames. Press Ctrl+C to stop.");

    if let Err(e) = forwarder.run(&mut tnc, shutdown_rx).await {
        error!("Forwarder error: {}", e);
        return Err(e);
    }

    Ok(())
}
