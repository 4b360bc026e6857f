//! # boardcast
//!
//! Real-time shared text board: one text buffer, pushed to every connected
//! browser over WebSocket, behind a single password.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use boardcast_hub::{DEFAULT_SNAPSHOT_FILE, Hub, HubConfig, SnapshotManager};
use boardcast_server::auth::AuthManager;
use boardcast_server::config::ServerConfig;
use boardcast_server::server::BoardcastServer;
use clap::Parser;
use tracing::info;

/// boardcast server.
#[derive(Parser, Debug)]
#[command(name = "boardcast", version, about = "Real-time shared text board")]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "BOARDCAST_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (1-65535).
    #[arg(
        long,
        env = "BOARDCAST_PORT",
        default_value_t = 8200,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    port: u16,

    /// Access password. A random one is generated and logged when omitted.
    #[arg(long, env = "BOARDCAST_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Snapshot file used by save and restore.
    #[arg(long, env = "BOARDCAST_SNAPSHOT_PATH", default_value = DEFAULT_SNAPSHOT_FILE)]
    snapshot_path: PathBuf,

    /// Log level filter (overridden by `RUST_LOG`).
    #[arg(long, env = "BOARDCAST_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Eight lowercase hex characters.
fn random_password() -> String {
    rand::random::<[u8; 4]>()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The configured password, or a generated one when it is absent or empty.
fn resolve_password(configured: Option<String>) -> String {
    match configured.filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => {
            let generated = random_password();
            info!(password = %generated, "no password given, generated one");
            generated
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_subscriber(&args.log_level);

    let password = resolve_password(args.password);
    let auth = AuthManager::new(&password).context("Invalid password")?;

    let hub_config = HubConfig::default();
    hub_config.validate().context("Invalid hub configuration")?;
    let server_config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };
    server_config.validate().context("Invalid server configuration")?;
    let grace = server_config.shutdown_grace();

    let metrics = boardcast_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let snapshots = SnapshotManager::new(args.snapshot_path);
    info!(path = %snapshots.path().display(), "snapshot file");
    let hub = Arc::new(Hub::new(hub_config, snapshots));
    let _ = hub.init();

    let server = BoardcastServer::new(server_config, Arc::clone(&hub), auth, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "boardcast listening on http://{addr}"
    );

    shutdown_signal().await?;

    info!("Shutting down...");
    server.shutdown().drain(&hub, handle, grace).await;
    info!("Shutdown complete");
    Ok(())
}
