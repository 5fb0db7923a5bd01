//! Voice Overlay Daemon
//!
//! Follows the voice channel selected in the local desktop client and prints
//! the matching overlay URL every time it changes.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (ports 6463-6472, streamkit client id)
//! voice-overlay
//!
//! # Start with custom config
//! voice-overlay --config /path/to/config.toml
//!
//! # Reconnect instead of stalling when the client rejects authentication
//! voice-overlay --reconnect-on-auth-failure
//! ```
//!
//! Each location change is written to stdout as one line, e.g.
//! `https://streamkit.discord.com/overlay/voice/{guild}/{channel}`,
//! so it can be piped into whatever renders the overlay.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voice_overlay::config::default_config_path;
use voice_overlay::rpc::{HttpTokenExchange, Supervisor, WatchSink};
use voice_overlay::Config;

#[derive(Parser, Debug)]
#[command(name = "voice-overlay")]
#[command(about = "Follows the active voice channel and drives the overlay location")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application client id
    #[arg(long)]
    client_id: Option<String>,

    /// Host the desktop client listens on
    #[arg(long)]
    host: Option<String>,

    /// First port of the rotation
    #[arg(long)]
    base_port: Option<u16>,

    /// Reconnect when the handshake is rejected
    #[arg(long)]
    reconnect_on_auth_failure: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("voice_overlay=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                Config::load(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?
            } else {
                Config::default()
            }
        }
    };

    // Apply CLI overrides
    if let Some(client_id) = args.client_id {
        config.client_id = client_id;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.base_port {
        config.base_port = port;
    }
    if args.reconnect_on_auth_failure {
        config.reconnect_on_auth_failure = true;
    }

    info!(
        host = %config.host,
        base_port = config.base_port,
        client_id = %config.client_id,
        "Starting voice-overlay"
    );

    let exchange = HttpTokenExchange::new(&config.token_url, config.token_timeout())?;
    let (sink, mut location) = WatchSink::new();
    let overlay = config.clone();

    let handle = Supervisor::new(config, Arc::new(exchange), Box::new(sink))?.spawn();

    loop {
        tokio::select! {
            changed = location.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(path) = location.borrow_and_update().as_deref() {
                    println!("{}", overlay.overlay_url(path));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    handle.stop().await;
    Ok(())
}
