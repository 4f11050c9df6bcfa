//! Peer workflows — advertise, discover-and-fetch, withdraw, enumerate, shutdown.
//!
//! Every workflow is a straight sequence of blocking steps. Control
//! exchanges go through [`IndexClient`] and are never retried; whatever
//! fails is handed back to the caller as a [`PeerError`].

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use stash_core::wire::{truncate_field, ControlMessage, PduType, CONTENT_LEN, PEER_LEN};

use crate::adverts::{Advert, AdvertError, AdvertTable};
use crate::control::{ControlError, IndexClient, Listing, Provider};
use crate::store::ContentStore;
use crate::transfer::{self, Fetched, TransferError};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("invalid content name {0:?}")]
    InvalidName(String),
    #[error("filename {filename:?} must match content name {content:?}")]
    FilenameMismatch { content: String, filename: String },
    #[error("no local file for {0:?}")]
    NoSuchFile(String),
    #[error("already advertising {0:?}")]
    AlreadyAdvertised(String),
    #[error("local advertisement table full")]
    LocalTableFull,
    #[error("not advertising {0:?}")]
    NotAdvertised(String),
    #[error("no provider for {0:?}")]
    NotFound(String),
    #[error("index rejected the request")]
    Rejected,
    #[error("unexpected {0:?} reply from index")]
    UnexpectedReply(PduType),
    #[error("provider address {0:?} is not usable")]
    BadProviderAddr(String),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("listener: {0}")]
    Listener(#[from] io::Error),
}

impl From<AdvertError> for PeerError {
    fn from(e: AdvertError) -> Self {
        match e {
            AdvertError::AlreadyAdvertised(content) => PeerError::AlreadyAdvertised(content),
            AdvertError::TableFull(_) => PeerError::LocalTableFull,
        }
    }
}

/// A successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertised {
    pub content: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Everything that happened during one discover-and-fetch.
#[derive(Debug)]
pub struct FetchReport {
    pub provider: Provider,
    pub fetched: Fetched,
    /// Outcome of registering the fetched copy with the index.
    pub auto: Result<Advertised, PeerError>,
}

/// Result of withdrawing everything at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub withdrawn: usize,
    pub total: usize,
}

pub struct Peer {
    id: String,
    client: IndexClient,
    adverts: AdvertTable,
    store: ContentStore,
    advertise_ip: Ipv4Addr,
}

impl Peer {
    /// `id` is cut to the peer field width.
    pub fn new(
        id: &str,
        client: IndexClient,
        store: ContentStore,
        max_adverts: usize,
        advertise_ip: Ipv4Addr,
    ) -> Self {
        Self {
            id: truncate_field(id, PEER_LEN),
            client,
            adverts: AdvertTable::new(max_adverts),
            store,
            advertise_ip,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn adverts(&self) -> &AdvertTable {
        &self.adverts
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn advertise_ip(&self) -> Ipv4Addr {
        self.advertise_ip
    }

    // ── Advertise ─────────────────────────────────────────────────────────────

    /// Register `content` with the index and start serving it.
    ///
    /// The listener is opened first so its port can be advertised; any
    /// failure before the entry is stored closes it again.
    pub async fn advertise(&mut self, content: &str, filename: &str) -> Result<Advertised, PeerError> {
        check_name(content)?;
        if filename != content {
            return Err(PeerError::FilenameMismatch {
                content: content.to_string(),
                filename: filename.to_string(),
            });
        }
        if self.store.resolve(content).is_none() {
            return Err(PeerError::NoSuchFile(content.to_string()));
        }
        if self.adverts.contains(content) {
            return Err(PeerError::AlreadyAdvertised(content.to_string()));
        }
        if !self.adverts.has_room() {
            return Err(PeerError::LocalTableFull);
        }

        let advert = Advert::new(content, &self.id, transfer::bind_listener()?)?;
        let port = advert.port;
        let ip = self.advertise_ip.to_string();

        let reply = self
            .client
            .request(&ControlMessage::register(&self.id, content, &ip, port))
            .await?;
        match reply.kind {
            PduType::Ack => {}
            PduType::Error => return Err(PeerError::Rejected),
            other => return Err(PeerError::UnexpectedReply(other)),
        }

        if let Err(e) = self.adverts.insert(advert) {
            tracing::warn!(content, error = %e, "registered but could not record entry, withdrawing");
            let _ = self
                .client
                .request(&ControlMessage::deregister(&self.id, content))
                .await;
            return Err(e.into());
        }

        tracing::info!(content, %ip, port, "advertising");
        Ok(Advertised {
            content: content.to_string(),
            ip: self.advertise_ip,
            port,
        })
    }

    // ── Discover and fetch ────────────────────────────────────────────────────

    /// Ask the index who serves `content`.
    pub async fn discover(&self, content: &str) -> Result<Provider, PeerError> {
        check_name(content)?;
        let reply = self
            .client
            .request(&ControlMessage::search(&self.id, content))
            .await?;
        match reply.kind {
            PduType::Search => Ok(Provider::from(&reply)),
            PduType::Error => Err(PeerError::NotFound(content.to_string())),
            other => Err(PeerError::UnexpectedReply(other)),
        }
    }

    /// Find a provider of `content`, download it, then advertise the copy.
    ///
    /// Auto-advertising runs whenever the provider sent a content header,
    /// even if no bytes followed; its outcome is reported separately.
    pub async fn discover_and_fetch(&mut self, content: &str) -> Result<FetchReport, PeerError> {
        let provider = self.discover(content).await?;
        let ip: Ipv4Addr = provider
            .ip
            .parse()
            .map_err(|_| PeerError::BadProviderAddr(provider.ip.clone()))?;
        let addr = SocketAddr::V4(SocketAddrV4::new(ip, provider.port));
        tracing::info!(content, provider = %provider.peer, %addr, "fetching");

        let fetched = transfer::fetch(addr, content, &self.store).await?;
        tracing::info!(
            content,
            bytes = fetched.bytes,
            digest = %hex::encode(fetched.digest.as_bytes()),
            complete = fetched.complete,
            path = %fetched.path.display(),
            "download finished"
        );

        let auto = self.advertise(content, content).await;
        Ok(FetchReport {
            provider,
            fetched,
            auto,
        })
    }

    // ── Withdraw ──────────────────────────────────────────────────────────────

    /// Deregister `content`. The local entry is only dropped once the index
    /// acknowledges, so an unanswered request leaves it serving.
    pub async fn withdraw(&mut self, content: &str) -> Result<(), PeerError> {
        if !self.adverts.contains(content) {
            return Err(PeerError::NotAdvertised(content.to_string()));
        }
        let reply = self
            .client
            .request(&ControlMessage::deregister(&self.id, content))
            .await?;
        match reply.kind {
            PduType::Ack => {
                drop(self.adverts.remove(content));
                tracing::info!(content, "withdrawn");
                Ok(())
            }
            PduType::Error => Err(PeerError::Rejected),
            other => Err(PeerError::UnexpectedReply(other)),
        }
    }

    // ── Enumerate ─────────────────────────────────────────────────────────────

    pub async fn enumerate(&self) -> Result<Listing, PeerError> {
        Ok(self.client.list().await?)
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Withdraw every entry, ignoring failures, and close all listeners.
    pub async fn shutdown(&mut self) -> Departure {
        let adverts = self.adverts.drain();
        let total = adverts.len();
        let mut withdrawn = 0;
        for advert in adverts {
            let msg = ControlMessage::deregister(&self.id, &advert.content);
            match self.client.request(&msg).await {
                Ok(reply) if reply.kind == PduType::Ack => withdrawn += 1,
                Ok(reply) => {
                    tracing::warn!(content = %advert.content, reply = ?reply.kind, "withdraw refused")
                }
                Err(e) => tracing::warn!(content = %advert.content, error = %e, "withdraw failed"),
            }
        }
        tracing::info!(withdrawn, total, "peer shut down");
        Departure { withdrawn, total }
    }
}

/// Content tags must fit the wire field and be safe to use as a file name.
fn check_name(content: &str) -> Result<(), PeerError> {
    if content.len() > CONTENT_LEN || !ContentStore::is_valid_name(content) {
        return Err(PeerError::InvalidName(content.to_string()));
    }
    Ok(())
}

/// Local address the kernel would use to reach the wider network.
///
/// The probe socket is connected but never sends. Falls back to loopback
/// when there is no route.
pub fn detect_local_ip() -> Ipv4Addr {
    let probe = || -> io::Result<Ipv4Addr> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 9))?;
        match socket.local_addr()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
            other => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("unusable local address {other}"),
            )),
        }
    };
    probe().unwrap_or_else(|e| {
        tracing::debug!(error = %e, "address detection failed, using loopback");
        Ipv4Addr::LOCALHOST
    })
}
