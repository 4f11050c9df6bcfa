//! Local advertisement table — the content this peer is currently serving.
//!
//! Each entry owns the TCP listener it was registered with. Dropping an
//! entry closes its listener, so removing from the table is all it takes
//! to stop serving.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use futures::future::select_all;
use tokio::net::{TcpListener, TcpStream};

use stash_core::wire::DEFAULT_MAX_ADVERTS;

/// One registered (content, peer) pair and its data listener.
#[derive(Debug)]
pub struct Advert {
    pub content: String,
    pub peer: String,
    pub port: u16,
    listener: TcpListener,
}

impl Advert {
    pub fn new(content: &str, peer: &str, listener: TcpListener) -> io::Result<Self> {
        let port = listener.local_addr()?.port();
        Ok(Self {
            content: content.to_string(),
            peer: peer.to_string(),
            port,
            listener,
        })
    }

    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdvertError {
    #[error("already advertising {0:?}")]
    AlreadyAdvertised(String),
    #[error("advertisement table full ({0} entries)")]
    TableFull(usize),
}

/// Result of waiting on every listener: the slot that fired and its accept.
pub type Accepted = (usize, io::Result<(TcpStream, SocketAddr)>);

type AcceptFuture<'a> = Pin<Box<dyn Future<Output = Accepted> + Send + 'a>>;

#[derive(Debug)]
pub struct AdvertTable {
    slots: Vec<Option<Advert>>,
}

impl AdvertTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn has_room(&self) -> bool {
        self.slots.iter().any(|s| s.is_none())
    }

    pub fn get(&self, content: &str) -> Option<&Advert> {
        self.iter().find(|a| a.content == content)
    }

    pub fn contains(&self, content: &str) -> bool {
        self.get(content).is_some()
    }

    /// Store `advert` in the first free slot. On failure the advert is
    /// dropped and its listener closed.
    pub fn insert(&mut self, advert: Advert) -> Result<usize, AdvertError> {
        if self.contains(&advert.content) {
            return Err(AdvertError::AlreadyAdvertised(advert.content));
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(AdvertError::TableFull(self.slots.len()))?;
        self.slots[slot] = Some(advert);
        Ok(slot)
    }

    /// Take the entry for `content` out of the table.
    pub fn remove(&mut self, content: &str) -> Option<Advert> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|a| a.content == content))?;
        self.slots[slot].take()
    }

    /// Empty the table, returning every entry in slot order.
    pub fn drain(&mut self) -> Vec<Advert> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Advert> + '_ {
        self.slots.iter().flatten()
    }

    /// Wait until any listener has a connection and accept exactly one.
    ///
    /// With no listeners open this never completes.
    pub async fn accept_next(&self) -> Accepted {
        let mut pending: Vec<AcceptFuture<'_>> = Vec::new();
        for (slot, advert) in self.slots.iter().enumerate() {
            if let Some(advert) = advert {
                pending.push(Box::pin(async move { (slot, advert.listener.accept().await) }));
            }
        }

        if pending.is_empty() {
            return std::future::pending().await;
        }
        let (accepted, _, _) = select_all(pending).await;
        accepted
    }
}

impl Default for AdvertTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ADVERTS)
    }
}
