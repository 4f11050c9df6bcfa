//! stashd — the Stash index.
//!
//! Usage: stashd [port]
//!
//! Binds the control port on all interfaces and answers register, search,
//! deregister and list requests until interrupted.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use stash_core::config::StashConfig;
use stash_services::{IndexServer, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = StashConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = StashConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        StashConfig::default()
    });

    let port = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u16>()
            .with_context(|| format!("invalid port {arg:?}"))?,
        None => config.index.port,
    };

    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("failed to bind UDP port {port}"))?;
    let bound = socket.local_addr()?.port();
    println!("stash index listening on UDP port {bound}");
    tracing::info!(port = bound, "stashd starting");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    IndexServer::new(socket, Registry::new(), shutdown_tx.subscribe())
        .run()
        .await
        .context("index service failed")?;

    Ok(())
}
