//! `sphere-mcp` binary.
//!
//! Loads the inventory named by `SPHERE_INVENTORY`, then serves the keywords
//! on the transports selected by `SPHERE_TRANSPORT` until Ctrl-C. On shutdown
//! every open connection is closed, waiting at most `SPHERE_SHUTDOWN_GRACE_SECS`
//! for a running keyword to release the library.

use rmcp::transport::stdio;
use rmcp::ServiceExt;
use sphere_mcp::{http, KeywordServer, ServerConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the stdio transport
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("sphere_mcp=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(?config, "Configuration loaded");
    config.validate_startup()?;

    let server = KeywordServer::new(config.datacenter().await?, config.library.clone());
    let (stop_tx, _) = broadcast::channel::<()>(1);
    let mut transports: Vec<JoinHandle<()>> = Vec::new();

    if config.transport_mode.http_enabled() {
        let listener = TcpListener::bind(config.http_addr).await?;
        transports.push(tokio::spawn(run_http(
            server.clone(),
            listener,
            stop_tx.subscribe(),
        )));
    }
    if config.transport_mode.stdio_enabled() {
        transports.push(tokio::spawn(run_stdio(server.clone(), stop_tx.subscribe())));
    }
    tracing::info!(transport = ?config.transport_mode, "Keyword server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    let _ = stop_tx.send(());

    server.shutdown(config.shutdown_grace).await;
    join_transports(transports, config.shutdown_grace).await;
    Ok(())
}

async fn run_http(server: KeywordServer, listener: TcpListener, mut stop: broadcast::Receiver<()>) {
    let stopped = async move {
        let _ = stop.recv().await;
    };
    if let Err(e) = http::serve(server, listener, stopped).await {
        tracing::error!(error = %e, "HTTP transport failed");
    }
}

async fn run_stdio(server: KeywordServer, mut stop: broadcast::Receiver<()>) {
    let service = match server.serve(stdio()).await {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start stdio transport");
            return;
        }
    };
    tokio::select! {
        result = service.waiting() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Stdio transport failed");
            }
        }
        _ = stop.recv() => tracing::info!("Stdio transport stopped"),
    }
}

/// Wait for transports to drain, abandoning any still busy after `grace`.
async fn join_transports(transports: Vec<JoinHandle<()>>, grace: Duration) {
    for transport in transports {
        if tokio::time::timeout(grace, transport).await.is_err() {
            tracing::warn!("Transport still busy after shutdown grace, exiting anyway");
        }
    }
}
