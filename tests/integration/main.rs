//! Stash integration test harness.
//!
//! Everything runs in-process over loopback: an index on an ephemeral UDP
//! port, peers with their own scratch directories, real TCP transfers.
//!
//!   cargo test --test integration
//!
//! Each test owns its index and scratch directories and cleans up after
//! itself, so tests may run in parallel.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use stash_services::runtime::{self, Command, Outcome, Request};
use stash_services::{ContentStore, Departure, IndexClient, IndexServer, Peer, Registry};

mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

/// An index service running on a loopback port.
pub struct Index {
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

impl Index {
    pub async fn start() -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .context("failed to bind index socket")?;
        let addr = socket.local_addr()?;
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(IndexServer::new(socket, Registry::new(), rx).run());
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    /// Stop the service and wait for its socket to close.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("index task panicked")??;
        Ok(())
    }

    pub async fn client(&self) -> Result<IndexClient> {
        Ok(IndexClient::bind(self.addr).await?)
    }
}

/// A temporary directory tree with `serve/` and `dl/`, removed on drop.
pub struct Scratch {
    pub root: PathBuf,
}

static SCRATCH_SEQ: AtomicUsize = AtomicUsize::new(0);

impl Scratch {
    pub fn new(tag: &str) -> Self {
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "stash-it-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("serve")).expect("create scratch dir");
        Self { root }
    }

    pub fn serve_dir(&self) -> PathBuf {
        self.root.join("serve")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.root.join("dl")
    }

    pub fn store(&self) -> ContentStore {
        ContentStore::new(self.serve_dir(), self.download_dir(), "recv_")
    }

    /// Put `bytes` in the serve directory under `name`.
    pub fn share(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.serve_dir().join(name);
        std::fs::write(&path, bytes).expect("write shared file");
        path
    }

    pub fn downloaded(&self, name: &str) -> PathBuf {
        self.download_dir().join(format!("recv_{name}"))
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// A peer that advertises 127.0.0.1, talking to `index`.
pub async fn peer(index: SocketAddr, id: &str, scratch: &Scratch) -> Result<Peer> {
    let client = IndexClient::bind(index).await?;
    Ok(Peer::new(id, client, scratch.store(), 16, Ipv4Addr::LOCALHOST))
}

/// A peer running its event loop, driven through the command channel.
pub struct RunningPeer {
    tx: mpsc::Sender<Request>,
    task: JoinHandle<Departure>,
}

impl RunningPeer {
    pub fn spawn(peer: Peer) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(runtime::run(peer, rx));
        Self { tx, task }
    }

    pub async fn send(&self, command: Command) -> Result<Outcome> {
        Ok(runtime::submit(&self.tx, command).await?)
    }

    pub async fn quit(self) -> Result<Departure> {
        let outcome = self.send(Command::Quit).await?;
        let departure = self.task.await.context("peer loop panicked")?;
        match outcome {
            Outcome::Stopped(d) => assert_eq!(d, departure),
            other => panic!("quit produced {other:?}"),
        }
        Ok(departure)
    }
}

/// Send raw bytes to `addr` and return the first reply, if one arrives
/// within `wait`.
pub async fn raw_exchange(addr: SocketAddr, bytes: &[u8], wait: Duration) -> Result<Option<Vec<u8>>> {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    socket.send_to(bytes, addr).await?;
    let mut buf = [0u8; 512];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(r) => {
            let (len, _) = r?;
            Ok(Some(buf[..len].to_vec()))
        }
        Err(_) => Ok(None),
    }
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_default()
}
