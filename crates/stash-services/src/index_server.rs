//! Index service — the UDP request loop in front of the registry.
//!
//! One datagram is read, answered, and only then is the next one read.
//! Each request gets exactly one reply frame, except a list request which
//! gets one row per entry followed by a terminator row with an empty peer.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use zerocopy::AsBytes;

use stash_core::wire::{ControlFrame, ControlMessage, PduType, WireError};

use crate::registry::{Registry, RegistryError};

pub struct IndexServer {
    socket: UdpSocket,
    registry: Registry,
    shutdown: broadcast::Receiver<()>,
}

impl IndexServer {
    pub fn new(socket: UdpSocket, registry: Registry, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            socket,
            registry,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve requests until the shutdown channel fires. The registry is
    /// dropped with the server.
    pub async fn run(mut self) -> std::io::Result<()> {
        // larger than a frame so oversized datagrams show up as such
        let mut buf = vec![0u8; 512];

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(entries = self.registry.len(), "index shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..len], from).await;
                }
            }
        }
    }

    async fn handle_datagram(&mut self, data: &[u8], from: SocketAddr) {
        let frame = match ControlFrame::decode(data) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%from, error = %e, "discarding malformed frame");
                return;
            }
        };

        for reply in self.respond(&frame) {
            if let Err(e) = self.socket.send_to(reply.encode().as_bytes(), from).await {
                tracing::warn!(%from, error = %e, "failed to send reply");
                return;
            }
        }
    }

    /// Apply one request to the registry and build the reply frames.
    pub fn respond(&mut self, frame: &ControlFrame) -> Vec<ControlMessage> {
        let request = match ControlMessage::try_from(frame) {
            Ok(m) => m,
            Err(WireError::UnknownType(kind)) => {
                tracing::debug!(kind, "unknown request type");
                return vec![ControlMessage::bare(PduType::Error)];
            }
            Err(e) => {
                tracing::debug!(error = %e, "unreadable request");
                return vec![ControlMessage::bare(PduType::Error)];
            }
        };

        match request.kind {
            PduType::Register => vec![self.register(&request)],
            PduType::Search => vec![self.search(&request)],
            PduType::Deregister => vec![self.deregister(&request)],
            PduType::List => self.list(),
            other => {
                tracing::debug!(kind = ?other, "not a request type");
                vec![ControlMessage::bare(PduType::Error)]
            }
        }
    }

    fn register(&mut self, req: &ControlMessage) -> ControlMessage {
        match self
            .registry
            .register(&req.peer, &req.content, &req.ip, req.port)
        {
            Ok(slot) => {
                tracing::info!(
                    peer = %req.peer,
                    content = %req.content,
                    ip = %req.ip,
                    port = req.port,
                    slot,
                    "registered"
                );
                ControlMessage::bare(PduType::Ack)
            }
            Err(e) => {
                log_rejection("register", req, &e);
                ControlMessage::bare(PduType::Error)
            }
        }
    }

    fn search(&mut self, req: &ControlMessage) -> ControlMessage {
        match self.registry.search(&req.content) {
            Ok(entry) => {
                tracing::debug!(
                    content = %entry.content,
                    provider = %entry.peer,
                    use_count = entry.use_count,
                    "search selected provider"
                );
                ControlMessage::provider(
                    PduType::Search,
                    &entry.peer,
                    &entry.content,
                    &entry.ip,
                    entry.port,
                )
            }
            Err(e) => {
                log_rejection("search", req, &e);
                ControlMessage::bare(PduType::Error)
            }
        }
    }

    fn deregister(&mut self, req: &ControlMessage) -> ControlMessage {
        match self.registry.deregister(&req.peer, &req.content) {
            Ok(_) => {
                tracing::info!(peer = %req.peer, content = %req.content, "deregistered");
                ControlMessage::bare(PduType::Ack)
            }
            Err(e) => {
                log_rejection("deregister", req, &e);
                ControlMessage::bare(PduType::Error)
            }
        }
    }

    fn list(&self) -> Vec<ControlMessage> {
        let mut rows: Vec<ControlMessage> = self
            .registry
            .entries()
            .map(|e| ControlMessage::provider(PduType::List, &e.peer, &e.content, &e.ip, e.port))
            .collect();
        tracing::debug!(rows = rows.len(), "list");
        rows.push(ControlMessage::bare(PduType::List));
        rows
    }
}

fn log_rejection(op: &str, req: &ControlMessage, err: &RegistryError) {
    tracing::debug!(op, peer = %req.peer, content = %req.content, error = %err, "request rejected");
}
