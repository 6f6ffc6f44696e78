//! Skywave mesh chat daemon binary.
//!
//! # Usage
//!
//! ```bash
//! # Everything from a config file
//! skywave-node --config /etc/skywave.yaml
//!
//! # Minimal: callsign only, defaults for the rest
//! skywave-node --callsign NOCALL-1 -v
//! ```
//!
//! Exits 0 on clean shutdown, non-zero on fatal configuration or
//! link-layer errors. SIGINT/SIGTERM trigger a clean, time-bounded
//! shutdown.

use std::path::PathBuf;

use clap::Parser;
use skywave_node::{
    DaemonError,
    config::{CliOverrides, FileConfig},
    runtime,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Skywave mesh chat daemon.
#[derive(Parser, Debug)]
#[command(name = "skywave-node")]
#[command(about = "Store-and-forward mesh chat over radio links")]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Station callsign (overrides the config file).
    #[arg(long)]
    callsign: Option<String>,

    /// Chat database path (overrides the config file).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Node mode: full, relay, or monitor (overrides the config file).
    #[arg(long)]
    mode: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let mode = args
        .mode
        .as_deref()
        .map(|text| text.parse::<skywave_core::NodeMode>())
        .transpose()
        .map_err(DaemonError::Config)?;

    let setup = file.build(CliOverrides {
        callsign: args.callsign,
        db_path: args.db_path,
        mode,
    })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // The command channel stays open for future front-ends; the daemon
    // runs headless until signalled.
    let (_command_tx, command_rx) = tokio::sync::mpsc::channel(16);

    runtime::run(setup, command_rx, shutdown_rx).await?;
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(error) => {
                tracing::warn!(%error, "cannot install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            },
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
