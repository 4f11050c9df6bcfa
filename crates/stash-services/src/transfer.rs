//! Data channel — the peer-to-peer TCP download protocol.
//!
//! Client → server: `D` + 10-byte content name.
//! Server → client: `E` and close, or `C` followed by the raw bytes of the
//! resource, ended by closing the connection.
//!
//! Both sides give up after DATA_IDLE_TIMEOUT_SECS without progress.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use stash_core::wire::{
    download_request, requested_name, PduType, CONTENT_LEN, DATA_IDLE_TIMEOUT_SECS,
    LISTEN_BACKLOG, STREAM_CHUNK_SIZE,
};

use crate::store::ContentStore;

const IDLE: Duration = Duration::from_secs(DATA_IDLE_TIMEOUT_SECS);

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("data channel i/o: {0}")]
    Io(#[from] io::Error),
    #[error("no progress for {} s", DATA_IDLE_TIMEOUT_SECS)]
    IdleTimeout,
    #[error("provider closed the connection without a header")]
    NoHeader,
    #[error("provider does not have the requested content")]
    Refused,
    #[error("unexpected header byte 0x{0:02x}")]
    UnexpectedHeader(u8),
}

/// Run one data-channel step, bounded by the idle timeout.
async fn idle<T>(fut: impl Future<Output = io::Result<T>>) -> Result<T, TransferError> {
    match tokio::time::timeout(IDLE, fut).await {
        Ok(r) => r.map_err(TransferError::Io),
        Err(_) => Err(TransferError::IdleTimeout),
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Open a content listener on an OS-assigned port, all IPv4 interfaces.
pub fn bind_listener() -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

// ── Server side ───────────────────────────────────────────────────────────────

/// What happened to one inbound download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    /// The resource was streamed in full.
    Sent {
        name: String,
        bytes: u64,
        digest: blake3::Hash,
    },
    /// No such resource; an error tag was sent.
    Missing { name: String },
}

/// Serve one accepted connection to completion.
///
/// A bad request tag closes the connection without a reply. Content that is
/// missing or cannot be opened gets the error tag. Failures while streaming
/// are returned but the client is not told anything more.
pub async fn serve_connection(
    mut stream: TcpStream,
    store: &ContentStore,
) -> Result<Served, TransferError> {
    let tag = idle(stream.read_u8()).await?;
    if tag != u8::from(PduType::Download) {
        return Err(TransferError::UnexpectedHeader(tag));
    }

    let mut field = [0u8; CONTENT_LEN];
    idle(stream.read_exact(&mut field)).await?;
    let name = requested_name(&field);

    let mut file = match store.open(&name).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            refuse(&mut stream).await?;
            return Ok(Served::Missing { name });
        }
        Err(e) => {
            tracing::warn!(content = %name, error = %e, "cannot open requested content");
            refuse(&mut stream).await?;
            return Err(e.into());
        }
    };

    idle(stream.write_all(&[u8::from(PduType::Content)])).await?;

    let mut buf = BytesMut::with_capacity(STREAM_CHUNK_SIZE);
    let mut hasher = blake3::Hasher::new();
    let mut bytes = 0u64;
    loop {
        buf.clear();
        let n = file.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
        idle(stream.write_all(&buf)).await?;
        hasher.update(&buf);
        bytes += n as u64;
    }
    let _ = stream.shutdown().await;

    Ok(Served::Sent {
        name,
        bytes,
        digest: hasher.finalize(),
    })
}

/// Answer with the error tag and close.
async fn refuse(stream: &mut TcpStream) -> Result<(), TransferError> {
    idle(stream.write_all(&[u8::from(PduType::Error)])).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Result of a download that got as far as a content header.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub path: PathBuf,
    pub bytes: u64,
    pub digest: blake3::Hash,
    /// False when the stream broke off (error or idle timeout) before the
    /// provider closed it.
    pub complete: bool,
}

/// Download `content` from the provider at `addr` into the store.
///
/// Errors before the content header leave nothing on disk. Once the header
/// arrived, whatever was received is kept and reported.
pub async fn fetch(
    addr: SocketAddr,
    content: &str,
    store: &ContentStore,
) -> Result<Fetched, TransferError> {
    let mut stream = idle(TcpStream::connect(addr)).await?;
    idle(stream.write_all(&download_request(content))).await?;

    let header = match idle(stream.read_u8()).await {
        Ok(h) => h,
        Err(TransferError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(TransferError::NoHeader)
        }
        Err(e) => return Err(e),
    };
    match PduType::try_from(header) {
        Ok(PduType::Content) => {}
        Ok(PduType::Error) => return Err(TransferError::Refused),
        _ => return Err(TransferError::UnexpectedHeader(header)),
    }

    let (mut file, path) = store.create(content).await?;
    let mut buf = BytesMut::with_capacity(STREAM_CHUNK_SIZE);
    let mut hasher = blake3::Hasher::new();
    let mut bytes = 0u64;
    let mut complete = true;

    loop {
        buf.clear();
        match idle(stream.read_buf(&mut buf)).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%addr, content, bytes, error = %e, "download interrupted");
                complete = false;
                break;
            }
        }
        if let Err(e) = file.write_all(&buf).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write download");
            complete = false;
            break;
        }
        hasher.update(&buf);
        bytes += buf.len() as u64;
    }
    file.flush().await?;

    Ok(Fetched {
        path,
        bytes,
        digest: hasher.finalize(),
        complete,
    })
}
