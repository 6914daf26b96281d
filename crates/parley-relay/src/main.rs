//! # parley-relay
//!
//! Signaling relay binary. Loads settings, sets up logging and metrics,
//! and serves `/ws/signaling/{room}` until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use parley_server::{RelayServer, RoomRegistry, ServerConfig};
use parley_settings::{LogFormat, ParleySettings};

/// Parley WebRTC signaling relay.
#[derive(Parser, Debug)]
#[command(name = "parley-relay", about = "WebRTC signaling relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.parley/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` wins over both).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Fold command-line overrides into the loaded settings.
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.json {
            settings.logging.format = LogFormat::Json;
        }
    }

    fn log_filter<'a>(&'a self, settings: &ParleySettings) -> &'a str {
        self.log_level
            .as_deref()
            .unwrap_or_else(|| settings.logging.level.as_filter_str())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(parley_settings::settings_path);
    let mut settings = parley_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    parley_core::logging::init_subscriber(
        args.log_filter(&settings),
        settings.logging.format == LogFormat::Json,
    );

    let config = ServerConfig::from_settings(&settings);
    let shutdown_timeout = config.shutdown_timeout();
    let registry = Arc::new(RoomRegistry::new(config.max_room_members));
    let mut server = RelayServer::new(config, registry);
    match parley_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        %addr,
        version = %settings.version,
        "{} listening on ws://{addr}/ws/signaling/{{room}}/",
        settings.name
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let started = Instant::now();
    let stopped = server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(shutdown_timeout))
        .await;
    if !stopped {
        tracing::warn!("accept loop did not stop in time");
    }
    let remaining = shutdown_timeout.saturating_sub(started.elapsed());
    if !server.drain(remaining).await {
        tracing::warn!(
            open = server.active_connections(),
            "exiting with connections still open"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
