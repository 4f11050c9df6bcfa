//! Peer event loop.
//!
//! A single task owns the [`Peer`] and waits on two things at once: the next
//! command from the console and a connection on any open listener. Whichever
//! is ready first runs to completion before the loop waits again, so a slow
//! download being served holds up commands until it finishes or times out.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::control::Listing;
use crate::peer::{Advertised, Departure, FetchReport, Peer, PeerError};
use crate::transfer::{self, Served};

/// One operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Advertise { content: String, filename: String },
    Fetch { content: String },
    List,
    Withdraw { content: String },
    Quit,
}

/// What a command produced, handed back to the console for printing.
#[derive(Debug)]
pub enum Outcome {
    Advertised(Result<Advertised, PeerError>),
    Fetched(Result<FetchReport, PeerError>),
    Listed(Result<Listing, PeerError>),
    Withdrawn {
        content: String,
        result: Result<(), PeerError>,
    },
    Stopped(Departure),
}

/// A command and where to send its outcome.
pub type Request = (Command, oneshot::Sender<Outcome>);

/// Drive `peer` until a quit command arrives or every command sender is
/// gone. Either way the peer withdraws its entries before returning.
pub async fn run(mut peer: Peer, mut commands: mpsc::Receiver<Request>) -> Departure {
    tracing::info!(peer = peer.id(), ip = %peer.advertise_ip(), "peer running");

    loop {
        tokio::select! {
            request = commands.recv() => {
                let Some((command, reply)) = request else {
                    tracing::info!("command channel closed");
                    return peer.shutdown().await;
                };
                let outcome = execute(&mut peer, command).await;
                let stopped = match outcome {
                    Outcome::Stopped(departure) => Some(departure),
                    _ => None,
                };
                if reply.send(outcome).is_err() {
                    tracing::debug!("outcome dropped, console gone");
                }
                if let Some(departure) = stopped {
                    return departure;
                }
            }

            (slot, accepted) = peer.adverts().accept_next() => {
                match accepted {
                    Ok((stream, from)) => serve(&peer, stream, from).await,
                    Err(e) => tracing::warn!(slot, error = %e, "accept failed"),
                }
            }
        }
    }
}

/// Run one command. Quit is the only command that yields `Stopped`, and the
/// loop ends after replying to it.
async fn execute(peer: &mut Peer, command: Command) -> Outcome {
    match command {
        Command::Advertise { content, filename } => {
            Outcome::Advertised(peer.advertise(&content, &filename).await)
        }
        Command::Fetch { content } => Outcome::Fetched(peer.discover_and_fetch(&content).await),
        Command::List => Outcome::Listed(peer.enumerate().await),
        Command::Withdraw { content } => {
            let result = peer.withdraw(&content).await;
            Outcome::Withdrawn { content, result }
        }
        Command::Quit => Outcome::Stopped(peer.shutdown().await),
    }
}

/// Serve one inbound download to completion.
async fn serve(peer: &Peer, stream: TcpStream, from: SocketAddr) {
    match transfer::serve_connection(stream, peer.store()).await {
        Ok(Served::Sent { name, bytes, digest }) => tracing::info!(
            %from,
            content = %name,
            bytes,
            digest = %hex::encode(digest.as_bytes()),
            "served"
        ),
        Ok(Served::Missing { name }) => {
            tracing::info!(%from, content = %name, "requested content not found")
        }
        Err(e) => tracing::warn!(%from, error = %e, "serving failed"),
    }
}

/// Submit `command` to a running loop and wait for its outcome.
pub async fn submit(tx: &mpsc::Sender<Request>, command: Command) -> io::Result<Outcome> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send((command, reply_tx))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer loop has stopped"))?;
    reply_rx
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer loop dropped the command"))
}
