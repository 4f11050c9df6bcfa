//! Control channel client — synchronous request/reply with the index over UDP.
//!
//! Each exchange sends one frame and waits at most CONTROL_TIMEOUT_SECS for
//! the answer. Nothing is ever retried: a timeout is reported to the caller,
//! who decides what to do next.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use zerocopy::AsBytes;

use stash_core::wire::{ControlMessage, PduType, WireError, CONTROL_TIMEOUT_SECS};

/// Reply wait for every control exchange.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(CONTROL_TIMEOUT_SECS);

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("no reply from index within {} s", CONTROL_TIMEOUT_SECS)]
    Timeout,
    #[error("control socket: {0}")]
    Io(#[from] io::Error),
    #[error("malformed reply: {0}")]
    Malformed(#[from] WireError),
}

/// A provider as reported by the index, in a search reply or a list row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub peer: String,
    pub content: String,
    pub ip: String,
    pub port: u16,
}

impl From<&ControlMessage> for Provider {
    fn from(m: &ControlMessage) -> Self {
        Self {
            peer: m.peer.clone(),
            content: m.content.clone(),
            ip: m.ip.clone(),
            port: m.port,
        }
    }
}

/// Rows received for one list request.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub rows: Vec<Provider>,
    /// True when the terminator row arrived. False when the listing was cut
    /// short by a timeout or a frame of another type.
    pub complete: bool,
}

pub struct IndexClient {
    socket: UdpSocket,
    index: SocketAddr,
}

impl IndexClient {
    /// Bind an ephemeral UDP socket for talking to the index at `index`.
    pub async fn bind(index: SocketAddr) -> io::Result<Self> {
        let local = match index {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, index })
    }

    pub fn index_addr(&self) -> SocketAddr {
        self.index
    }

    /// Send one request and wait for its single reply.
    pub async fn request(&self, msg: &ControlMessage) -> Result<ControlMessage, ControlError> {
        self.drain_stale();
        self.send(msg).await?;
        let reply = self.recv(Instant::now() + CONTROL_TIMEOUT).await?;
        tracing::debug!(request = ?msg.kind, reply = ?reply.kind, "control exchange");
        Ok(reply)
    }

    /// Send a list request and collect rows up to the terminator.
    ///
    /// Only a missing first frame is an error; a listing that breaks off later
    /// returns what arrived with `complete == false`.
    pub async fn list(&self) -> Result<Listing, ControlError> {
        self.drain_stale();
        self.send(&ControlMessage::bare(PduType::List)).await?;

        let mut listing = Listing::default();
        loop {
            let frame = match self.recv(Instant::now() + CONTROL_TIMEOUT).await {
                Ok(f) => f,
                Err(e) if listing.rows.is_empty() => return Err(e),
                Err(e) => {
                    tracing::warn!(rows = listing.rows.len(), error = %e, "listing cut short");
                    return Ok(listing);
                }
            };
            if frame.kind != PduType::List {
                tracing::warn!(kind = ?frame.kind, "listing ended by non-list frame");
                return Ok(listing);
            }
            if frame.is_list_terminator() {
                listing.complete = true;
                return Ok(listing);
            }
            listing.rows.push(Provider::from(&frame));
        }
    }

    async fn send(&self, msg: &ControlMessage) -> Result<(), ControlError> {
        let frame = msg.encode();
        self.socket.send_to(frame.as_bytes(), self.index).await?;
        Ok(())
    }

    /// Wait for the next frame from the index until `deadline`.
    async fn recv(&self, deadline: Instant) -> Result<ControlMessage, ControlError> {
        let mut buf = [0u8; 512];
        loop {
            let (len, from) = match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(r) => r?,
                Err(_) => return Err(ControlError::Timeout),
            };
            if !sent_by(self.index, from) {
                tracing::warn!(%from, "ignoring datagram not sent by the index");
                continue;
            }
            match ControlMessage::decode(&buf[..len]) {
                Err(WireError::FrameLength(n)) => {
                    tracing::warn!(%from, len = n, "dropping datagram of wrong length");
                }
                other => return Ok(other?),
            }
        }
    }

    /// Drop replies that arrived after an earlier exchange timed out.
    fn drain_stale(&self) {
        let mut buf = [0u8; 512];
        while let Ok((len, from)) = self.socket.try_recv_from(&mut buf) {
            tracing::debug!(%from, len, "discarding stale datagram");
        }
    }
}

/// Whether a datagram from `from` can be the index's reply.
///
/// A loopback index must match exactly. Otherwise only the port is
/// compared: an index bound to every interface of a multi-homed host may
/// answer from an address other than the one it was asked on.
fn sent_by(index: SocketAddr, from: SocketAddr) -> bool {
    if index.ip().is_loopback() {
        from == index
    } else {
        from.port() == index.port()
    }
}
