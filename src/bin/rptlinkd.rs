//! Repeater link daemon
//!
//! Loads the node configuration, accepts and dials links over TCP, and
//! runs the poll scheduler until Ctrl+C.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rptlink::{
    api::ApiServer,
    config::NodeConfig,
    network::{StaticDirectory, TcpTransport},
    node::{Node, NodeHandle},
    scheduler::Scheduler,
    telemetry::LogTelemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    tracing::info!("Starting node {}", config.node.name);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = TcpTransport::new(
        config.node.name.clone(),
        events_tx,
        Duration::from_secs(config.network.keepalive_secs),
    );
    let listen_addr: SocketAddr = format!("{}:{}", config.network.bind_address, config.network.port)
        .parse()
        .context("invalid network bind address")?;
    let _listener = transport.listen(listen_addr).await?;

    let directory = Arc::new(StaticDirectory::from_entries(&config.directory));
    let node = Node::new(config.clone(), transport.clone(), directory, Arc::new(LogTelemetry));
    let node = NodeHandle::new(node);

    for link in &config.startup_links {
        match node.connect_link(&link.node, link.mode, link.permanent) {
            Ok(outcome) => tracing::info!("Startup link {}: {:?}", link.node, outcome),
            Err(e) => tracing::warn!("Startup link {} failed: {}", link.node, e),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_handle = if config.api.enabled {
        let server = ApiServer::new(config.api.clone(), node.clone());
        Some(server.start_background(wait_for(shutdown_rx.clone())))
    } else {
        None
    };

    let scheduler = Scheduler::new(node.clone(), events_rx);
    let scheduler_handle = tokio::spawn(scheduler.run(wait_for(shutdown_rx)));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down with {} open connections", transport.connection_count());
    let _ = shutdown_tx.send(true);

    scheduler_handle.await?;
    if let Some(handle) = api_handle {
        handle.await?;
    }
    Ok(())
}

fn load_config() -> Result<NodeConfig> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| NodeConfig::default_path().filter(|p| p.exists()));
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            NodeConfig::load(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => {
            tracing::warn!("No configuration file, using defaults");
            Ok(NodeConfig::default())
        }
    }
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
