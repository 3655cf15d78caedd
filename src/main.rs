//! Session affinity proxy binary.
//!
//! ```text
//! client ──▶ listener ──▶ session pipeline ──▶ upstream rotation ──▶ backend
//!                             │      ▲
//!                             ▼      │
//!                          session store (redis or in-memory)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use session_affinity_proxy::config::loader::{load_config, load_default};
use session_affinity_proxy::lifecycle::{wait_for_signal, Shutdown};
use session_affinity_proxy::observability::{logging::init_logging, metrics::init_metrics};
use session_affinity_proxy::{HttpServer, StoreClient};

#[derive(Parser)]
#[command(name = "session-affinity-proxy", version, about = "Session affinity reverse proxy")]
struct Args {
    /// Path to a TOML config file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => load_default().context("invalid default configuration")?,
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "session-affinity-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = ?config.upstream.backends,
        store = %config.store.endpoint(),
        store_kind = ?config.store.kind,
        session_ttl_secs = config.session.ttl_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .context("invalid metrics address")?;
        init_metrics(addr);
    }

    let store = StoreClient::from_config(&config.store);
    if let Err(e) = store.ping().await {
        // Startup continues: requests fail open until the store comes back.
        tracing::warn!(error = %e, "Session store unreachable at startup");
    }

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listener.bind_address))?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, store);
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();

    server_task.await.context("server task panicked")??;
    tracing::info!("Shutdown complete");
    Ok(())
}
