//! stash-peer — share and fetch content through a Stash index.
//!
//! Usage: stash-peer [index_host index_port [advertise_ip]]
//!
//! Missing arguments fall back to the `[peer]` section of the config file.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use stash_core::config::StashConfig;
use stash_services::{detect_local_ip, runtime, ContentStore, IndexClient, Peer};

mod console;

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
    let settings = config.peer;

    let mut args = std::env::args().skip(1);
    let index_host = args.next().unwrap_or(settings.index_host);
    let index_port = match args.next() {
        Some(arg) => arg
            .parse::<u16>()
            .with_context(|| format!("invalid index port {arg:?}"))?,
        None => settings.index_port,
    };
    let advertise_ip = match args.next().unwrap_or(settings.advertise_ip) {
        ip if ip.is_empty() => detect_local_ip(),
        ip => ip
            .parse::<Ipv4Addr>()
            .with_context(|| format!("invalid advertise address {ip:?}"))?,
    };

    let index = resolve_index(&index_host, index_port).await?;
    let client = IndexClient::bind(index)
        .await
        .context("failed to bind control socket")?;
    tracing::info!(%index, %advertise_ip, "stash-peer starting");

    let store = ContentStore::new(
        settings.serve_dir,
        settings.download_dir,
        settings.download_prefix,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let Some(id) = console::prompt_peer_id(&mut lines).await? else {
        return Ok(());
    };

    let peer = Peer::new(&id, client, store, settings.max_adverts, advertise_ip);
    if peer.id() != id {
        println!("peer name shortened to {:?}", peer.id());
    }

    let (tx, rx) = mpsc::channel(1);
    let event_loop = tokio::spawn(runtime::run(peer, rx));

    let console_result = console::run(lines, tx).await;
    let departure = event_loop.await.context("peer event loop panicked")?;
    tracing::info!(withdrawn = departure.withdrawn, total = departure.total, "stash-peer exiting");
    console_result
}

/// First IPv4 address for the index host.
async fn resolve_index(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve index host {host:?}"))?
        .find(SocketAddr::is_ipv4)
        .with_context(|| format!("no IPv4 address for index host {host:?}"))
}
