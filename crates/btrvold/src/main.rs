//! btrvold - btrfs volume plugin daemon.
//!
//! Serves the Docker volume plugin protocol on a Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use btrvol::{BtrfsCli, JsonFileStore, VolumeDriver};
use btrvol_common::BtrvolPaths;
use btrvol_common::paths::DEFAULT_SOCKET;
use clap::Parser;
use tokio::net::UnixListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding volume subvolumes and state
    #[arg(long, env = "BTRVOL_HOME", default_value = "/var/lib/docker-btrfs-plugin")]
    home: PathBuf,

    /// Plugin socket path
    #[arg(long, env = "BTRVOL_SOCKET", default_value = DEFAULT_SOCKET)]
    socket: PathBuf,

    /// btrfs binary to invoke
    #[arg(long, env = "BTRVOL_BTRFS_BIN", default_value = "btrfs")]
    btrfs_bin: PathBuf,

    /// Do not bind mount volumes on first use
    #[arg(long)]
    no_bind_mount: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let paths = BtrvolPaths::with_home(&args.home);
    paths
        .create_dirs()
        .with_context(|| format!("failed to create home dir {}", args.home.display()))?;

    let adapter = BtrfsCli::new()
        .with_binary(&args.btrfs_bin)
        .with_bind_mount(!args.no_bind_mount);
    let driver = VolumeDriver::open(paths.clone(), adapter, JsonFileStore::new(paths))
        .context("failed to load volume state")?;
    let app = api::server::app(Arc::new(driver));

    if let Some(parent) = args.socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(&args.socket) {
        Ok(()) => tracing::debug!(socket = %args.socket.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove {}", args.socket.display()));
        }
    }

    let listener = UnixListener::bind(&args.socket)
        .with_context(|| format!("failed to bind {}", args.socket.display()))?;

    tracing::info!(
        socket = %args.socket.display(),
        home = %args.home.display(),
        "btrvold started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("plugin server failed")?;

    if let Err(e) = std::fs::remove_file(&args.socket) {
        tracing::warn!(error = %e, "Failed to remove socket");
    }
    tracing::info!("btrvold stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutting down");
}
