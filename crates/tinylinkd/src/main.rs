//! tinylinkd - line-oriented TCP server on top of the tinylink transport.
//!
//! Every line received is echoed back to the connection it came from.
//! A `quit` line closes that connection.

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use tinylink_core::config::TinylinkConfig;
use tinylink_services::tcp::{self, Windows};
use tinylink_services::{Network, NetworkSettings};

mod responder;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = TinylinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = TinylinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TinylinkConfig::default()
    });

    if let Some(port) = std::env::args().nth(1) {
        config.network.port = port
            .parse()
            .with_context(|| format!("invalid port argument: {port}"))?;
    }

    let addr = format!("{}:{}", config.network.bind_addr, config.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let network = Network::new(NetworkSettings::from(&config));
    tracing::info!(
        max_connections = config.network.max_connections,
        queue_high_water = config.buffering.queue_high_water,
        close_scope = ?config.buffering.close_scope,
        "tinylinkd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = tokio::spawn(tcp::serve(
        network.clone(),
        listener,
        Windows::from(&config.network),
        shutdown_tx.subscribe(),
    ));

    let responder_task = tokio::spawn(responder::run(network.clone()));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => tracing::error!("listener exited: {:?}", r),
        r = responder_task     => tracing::error!("responder exited: {:?}", r),
    }

    for id in network.connection_ids() {
        let _ = network.close_connection(id).await;
    }

    Ok(())
}
