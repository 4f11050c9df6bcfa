//! Stash wire format — the control frame and the data-channel handshake.
//!
//! These types ARE the protocol. Every field and every width below is part of
//! the wire contract shared by the index and every peer; changing anything
//! here breaks interoperability with running processes.
//!
//! The control frame is a #[repr(C)] struct made only of byte arrays and a
//! network-endian u16, so its layout has no padding and no host-order
//! dependence. zerocopy derives give allocation-free conversion to and from
//! the exact on-wire bytes. There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::network_endian::U16;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Field widths ──────────────────────────────────────────────────────────────

/// Width of the peer identifier field.
pub const PEER_LEN: usize = 10;

/// Width of the content tag field.
pub const CONTENT_LEN: usize = 10;

/// Width of the address field: 15 visible characters plus a terminator.
pub const IP_LEN: usize = 16;

/// Longest dotted-decimal address that fits in the address field.
pub const IP_MAX: usize = IP_LEN - 1;

// ── Control Frame ─────────────────────────────────────────────────────────────

/// The single message unit exchanged with the index over UDP.
///
/// Every control message, whatever its type, is exactly this many bytes.
/// Fields a message type does not use are zero-filled and must not be read.
///
/// Wire size: 39 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct ControlFrame {
    /// Message type byte, see [`PduType`].
    pub kind: u8,

    /// Peer identifier, zero-padded. Not necessarily zero-terminated.
    pub peer: [u8; PEER_LEN],

    /// Content tag, zero-padded. Not necessarily zero-terminated.
    pub content: [u8; CONTENT_LEN],

    /// Dotted-decimal IPv4 address, zero-padded ASCII.
    pub ip: [u8; IP_LEN],

    /// Data-channel TCP port.
    pub port: U16,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ControlFrame, [u8; 39]);

impl ControlFrame {
    /// Exact size of every control datagram.
    pub const SIZE: usize = std::mem::size_of::<ControlFrame>();

    /// Parse a received datagram.
    ///
    /// Anything that is not exactly [`ControlFrame::SIZE`] bytes is rejected
    /// without looking at its contents.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != Self::SIZE {
            return Err(WireError::FrameLength(bytes.len()));
        }
        Self::read_from(bytes).ok_or(WireError::FrameLength(bytes.len()))
    }

    /// True for the list-row frame with an all-zero peer field that ends a listing.
    pub fn is_list_terminator(&self) -> bool {
        self.kind == PduType::List as u8 && self.peer.iter().all(|b| *b == 0)
    }
}

// ── Message types ─────────────────────────────────────────────────────────────

/// One-byte message tags.
///
/// `Download` and `Content` only travel on the data channel. `Error` is shared:
/// on the control channel it is a rejected request, on the data channel it
/// means the server has no such resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    /// Register a content tag at an address.
    Register = b'R',
    /// Search request; also the type of a successful search reply.
    Search = b'S',
    /// Deregister a (peer, content) pair.
    Deregister = b'T',
    /// List request; also the type of every list row and the terminator.
    List = b'O',
    Ack = b'A',
    Error = b'E',
    /// Data channel: download request.
    Download = b'D',
    /// Data channel: content follows.
    Content = b'C',
}

impl TryFrom<u8> for PduType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            b'R' => Ok(PduType::Register),
            b'S' => Ok(PduType::Search),
            b'T' => Ok(PduType::Deregister),
            b'O' => Ok(PduType::List),
            b'A' => Ok(PduType::Ack),
            b'E' => Ok(PduType::Error),
            b'D' => Ok(PduType::Download),
            b'C' => Ok(PduType::Content),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<PduType> for u8 {
    fn from(t: PduType) -> u8 {
        t as u8
    }
}

// ── Logical message ───────────────────────────────────────────────────────────

/// A control message with its text fields decoded.
///
/// Text is held already truncated to the field widths, so a message that went
/// through [`ControlMessage::encode`] and back compares equal to the original
/// whenever the original fitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub kind: PduType,
    pub peer: String,
    pub content: String,
    pub ip: String,
    pub port: u16,
}

impl ControlMessage {
    /// A message of the given type with every field empty.
    pub fn bare(kind: PduType) -> Self {
        Self {
            kind,
            peer: String::new(),
            content: String::new(),
            ip: String::new(),
            port: 0,
        }
    }

    pub fn register(peer: &str, content: &str, ip: &str, port: u16) -> Self {
        Self {
            kind: PduType::Register,
            peer: truncate_field(peer, PEER_LEN),
            content: truncate_field(content, CONTENT_LEN),
            ip: truncate_field(ip, IP_MAX),
            port,
        }
    }

    pub fn search(peer: &str, content: &str) -> Self {
        Self {
            peer: truncate_field(peer, PEER_LEN),
            content: truncate_field(content, CONTENT_LEN),
            ..Self::bare(PduType::Search)
        }
    }

    pub fn deregister(peer: &str, content: &str) -> Self {
        Self {
            peer: truncate_field(peer, PEER_LEN),
            content: truncate_field(content, CONTENT_LEN),
            ..Self::bare(PduType::Deregister)
        }
    }

    /// A list row, or a successful search reply when `kind` is `Search`.
    pub fn provider(kind: PduType, peer: &str, content: &str, ip: &str, port: u16) -> Self {
        Self {
            kind,
            ..Self::register(peer, content, ip, port)
        }
    }

    /// True for the empty-peer list row that ends a listing.
    pub fn is_list_terminator(&self) -> bool {
        self.kind == PduType::List && self.peer.is_empty()
    }

    /// Build the on-wire frame. Text longer than its field is cut, the rest
    /// of each field is zero-filled.
    pub fn encode(&self) -> ControlFrame {
        ControlFrame {
            kind: self.kind.into(),
            peer: pack_field(&self.peer, PEER_LEN),
            content: pack_field(&self.content, CONTENT_LEN),
            ip: pack_field(&self.ip, IP_MAX),
            port: U16::new(self.port),
        }
    }

    /// Parse a datagram straight into a message.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let frame = ControlFrame::decode(bytes)?;
        Self::try_from(&frame)
    }
}

impl TryFrom<&ControlFrame> for ControlMessage {
    type Error = WireError;

    fn try_from(frame: &ControlFrame) -> Result<Self, WireError> {
        Ok(Self {
            kind: PduType::try_from(frame.kind)?,
            peer: unpack_field(&frame.peer),
            content: unpack_field(&frame.content),
            ip: unpack_field(&frame.ip[..IP_MAX]),
            port: frame.port.get(),
        })
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

/// Copy up to `limit` bytes of `text` into a zero-filled array.
pub fn pack_field<const N: usize>(text: &str, limit: usize) -> [u8; N] {
    let mut out = [0u8; N];
    let n = text.len().min(limit).min(N);
    out[..n].copy_from_slice(&text.as_bytes()[..n]);
    out
}

/// Read a zero-padded text field. The first zero byte ends the text.
pub fn unpack_field(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// The text a field of width `limit` will carry for `text`.
pub fn truncate_field(text: &str, limit: usize) -> String {
    let n = text.len().min(limit);
    String::from_utf8_lossy(&text.as_bytes()[..n]).into_owned()
}

// ── Data channel ──────────────────────────────────────────────────────────────

/// Size of the download request: one tag byte plus the content name field.
pub const DOWNLOAD_REQUEST_LEN: usize = 1 + CONTENT_LEN;

/// Build the download request a client writes after connecting.
pub fn download_request(content: &str) -> [u8; DOWNLOAD_REQUEST_LEN] {
    let mut out = [0u8; DOWNLOAD_REQUEST_LEN];
    out[0] = PduType::Download.into();
    out[1..].copy_from_slice(&pack_field::<CONTENT_LEN>(content, CONTENT_LEN));
    out
}

/// Extract the requested name from the content field of a download request.
/// Either a zero or a space ends the name.
pub fn requested_name(field: &[u8; CONTENT_LEN]) -> String {
    let end = field
        .iter()
        .position(|b| *b == 0 || *b == b' ')
        .unwrap_or(CONTENT_LEN);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Number of slots in the index registry.
pub const REGISTRY_CAPACITY: usize = 512;

/// Default number of content items a single peer can serve at once.
pub const DEFAULT_MAX_ADVERTS: usize = 16;

/// How long a peer waits for the index to answer a control request.
/// There is no retry.
pub const CONTROL_TIMEOUT_SECS: u64 = 2;

/// A data-channel transfer aborts after this long without progress.
pub const DATA_IDLE_TIMEOUT_SECS: u64 = 5;

/// Read size used when streaming a resource.
pub const STREAM_CHUNK_SIZE: usize = 4096;

/// Pending-connection backlog of each content listener.
pub const LISTEN_BACKLOG: i32 = 5;

/// Default UDP port of the index.
pub const DEFAULT_INDEX_PORT: u16 = 15000;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes, expected {}", ControlFrame::SIZE)]
    FrameLength(usize),

    #[error("unknown message type byte: 0x{0:02x}")]
    UnknownType(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
