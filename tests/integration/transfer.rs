use crate::*;

use stash_core::wire::DOWNLOAD_REQUEST_LEN;
use stash_services::transfer::{bind_listener, fetch, serve_connection};
use stash_services::{Served, TransferError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// ══════════════════════════════════════════════════════════════════════════════
//  Data channel
// ══════════════════════════════════════════════════════════════════════════════

/// Serve exactly one connection from `scratch` on a fresh listener.
async fn serve_once(scratch: &Scratch) -> (SocketAddr, JoinHandle<Result<Served, TransferError>>) {
    let listener = bind_listener().unwrap();
    let port = listener.local_addr().unwrap().port();
    let store = scratch.store();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        serve_connection(stream, &store).await
    });
    (SocketAddr::from((Ipv4Addr::LOCALHOST, port)), task)
}

/// A file spanning several stream chunks arrives intact.
#[tokio::test]
async fn test_multi_chunk_transfer() {
    let server = Scratch::new("xfer-srv");
    let client = Scratch::new("xfer-cli");
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect();
    server.share("big", &payload);

    let (addr, task) = serve_once(&server).await;
    let fetched = fetch(addr, "big", &client.store()).await.unwrap();

    assert!(fetched.complete);
    assert_eq!(fetched.bytes, payload.len() as u64);
    assert_eq!(fetched.path, client.downloaded("big"));
    assert_eq!(read(&fetched.path), payload);

    match task.await.unwrap().unwrap() {
        Served::Sent { name, bytes, digest } => {
            assert_eq!(name, "big");
            assert_eq!(bytes, payload.len() as u64);
            assert_eq!(digest, fetched.digest);
        }
        other => panic!("unexpected {other:?}"),
    }
}

/// Asking for something the server does not have yields an error tag and
/// no bytes, and nothing is written locally.
#[tokio::test]
async fn test_missing_content_refused() {
    let server = Scratch::new("miss-srv");
    let client = Scratch::new("miss-cli");

    let (addr, task) = serve_once(&server).await;
    let err = fetch(addr, "ghost", &client.store()).await.unwrap_err();
    assert!(matches!(err, TransferError::Refused), "got {err:?}");
    assert!(!client.downloaded("ghost").exists());

    let served = task.await.unwrap().unwrap();
    assert_eq!(served, Served::Missing { name: "ghost".into() });
}

/// An empty file is a valid, complete, zero-byte transfer.
#[tokio::test]
async fn test_empty_file_transfer() {
    let server = Scratch::new("empty-srv");
    let client = Scratch::new("empty-cli");
    server.share("void", b"");

    let (addr, task) = serve_once(&server).await;
    let fetched = fetch(addr, "void", &client.store()).await.unwrap();
    assert!(fetched.complete);
    assert_eq!(fetched.bytes, 0);
    assert!(fetched.path.exists());
    assert!(read(&fetched.path).is_empty());
    task.await.unwrap().unwrap();
}

/// Earlier downloads are served again under their plain content name.
#[tokio::test]
async fn test_downloaded_copy_is_servable() {
    let origin = Scratch::new("relay-origin");
    let relay = Scratch::new("relay-mid");
    let last = Scratch::new("relay-last");
    origin.share("doc", b"relayed bytes");

    let (addr, task) = serve_once(&origin).await;
    fetch(addr, "doc", &relay.store()).await.unwrap();
    task.await.unwrap().unwrap();

    let (addr, task) = serve_once(&relay).await;
    let fetched = fetch(addr, "doc", &last.store()).await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(read(&fetched.path), b"relayed bytes");
}

/// Nothing is listening: the fetch fails fast without creating a file.
#[tokio::test]
async fn test_connect_refused() {
    let client = Scratch::new("refused");
    let listener = bind_listener().unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = fetch(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), "doc", &client.store())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Io(_)), "got {err:?}");
    assert!(!client.downloaded("doc").exists());
}

// ── Misbehaving providers ─────────────────────────────────────────────────────

/// Accept one connection, read the request, then hand the stream to `then`.
async fn rogue<F, Fut>(then: F) -> SocketAddr
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = bind_listener().unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut req = [0u8; DOWNLOAD_REQUEST_LEN];
        stream.read_exact(&mut req).await.unwrap();
        then(stream).await;
    });
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// A provider that takes the request and never answers is given up on
/// after the idle timeout, and nothing is written locally.
#[tokio::test]
async fn test_silent_provider_times_out() {
    let client = Scratch::new("silent");
    let addr = rogue(|stream| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    })
    .await;

    let started = std::time::Instant::now();
    let err = fetch(addr, "doc", &client.store()).await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, TransferError::IdleTimeout), "got {err:?}");
    assert!(waited >= Duration::from_millis(4900), "gave up after {waited:?}");
    assert!(waited < Duration::from_secs(8), "waited {waited:?}");
    assert!(!client.downloaded("doc").exists());
}

/// Closing the connection before any header is not a refusal.
#[tokio::test]
async fn test_close_without_header() {
    let client = Scratch::new("hangup");
    let addr = rogue(|stream| async move { drop(stream) }).await;

    let err = fetch(addr, "doc", &client.store()).await.unwrap_err();
    assert!(matches!(err, TransferError::NoHeader), "got {err:?}");
    assert!(!client.downloaded("doc").exists());
}

/// A stream that stalls after the header keeps what arrived and is marked
/// incomplete.
#[tokio::test]
async fn test_stalled_stream_keeps_partial_file() {
    let client = Scratch::new("stall");
    let addr = rogue(|mut stream| async move {
        stream.write_all(b"Cfirst half").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    })
    .await;

    let fetched = fetch(addr, "doc", &client.store()).await.unwrap();
    assert!(!fetched.complete);
    assert_eq!(fetched.bytes, 10);
    assert_eq!(fetched.path, client.downloaded("doc"));
    assert_eq!(read(&fetched.path), b"first half");
}
