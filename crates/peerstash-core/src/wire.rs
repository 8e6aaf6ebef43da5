//! peerstash wire format: the protocol messages exchanged on the groups.
//!
//! Every datagram is an ASCII header followed by an optional binary body:
//!
//! ```text
//! TYPE VERSION SENDER_ID FILE_ID CHUNK_NO REPLICATION_DEGREE\r\n\r\n<body>
//! ```
//!
//! All six header fields are always emitted; fields a type does not use are
//! written as `0` and ignored on decode. Only PUTCHUNK and CHUNK carry a
//! body, and its length is whatever follows the terminator.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::ids::{ChunkKey, FileId, PeerId};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Header terminator. The body starts right after its first occurrence.
pub const HEADER_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Default maximum chunk body size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64_000;

/// Room reserved for the ASCII header in a chunk-carrying datagram.
pub const HEADER_SLACK: usize = 256;

/// Receive buffer size for chunk-carrying groups.
pub fn max_datagram(chunk_size: usize) -> usize {
    chunk_size + HEADER_SLACK
}

// ── Groups ────────────────────────────────────────────────────────────────────

/// The three multicast groups of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Header-only traffic: STORED, GETCHUNK, DELETE, REMOVED, GET_DELETED.
    Control,
    /// PUTCHUNK.
    Data,
    /// CHUNK.
    Recovery,
}

impl Group {
    pub fn name(&self) -> &'static str {
        match self {
            Group::Control => "control",
            Group::Data => "data",
            Group::Recovery => "recovery",
        }
    }
}

// ── Version ───────────────────────────────────────────────────────────────────

/// Protocol version, `<major>.<minor>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const V1_0: Version = Version { major: 1, minor: 0 };
}

impl Default for Version {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| WireError::InvalidVersion(s.to_string()))?;
        let major = major
            .parse()
            .map_err(|_| WireError::InvalidVersion(s.to_string()))?;
        let minor = minor
            .parse()
            .map_err(|_| WireError::InvalidVersion(s.to_string()))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for Version {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

// ── Message types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    PutChunk,
    Stored,
    GetChunk,
    Chunk,
    Delete,
    Removed,
    GetDeleted,
}

impl MessageType {
    /// The header token for this type.
    pub fn token(&self) -> &'static str {
        match self {
            MessageType::PutChunk => "PUTCHUNK",
            MessageType::Stored => "STORED",
            MessageType::GetChunk => "GETCHUNK",
            MessageType::Chunk => "CHUNK",
            MessageType::Delete => "DELETE",
            MessageType::Removed => "REMOVED",
            MessageType::GetDeleted => "GET_DELETED",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "PUTCHUNK" => Some(MessageType::PutChunk),
            "STORED" => Some(MessageType::Stored),
            "GETCHUNK" => Some(MessageType::GetChunk),
            "CHUNK" => Some(MessageType::Chunk),
            "DELETE" => Some(MessageType::Delete),
            "REMOVED" => Some(MessageType::Removed),
            "GET_DELETED" => Some(MessageType::GetDeleted),
            _ => None,
        }
    }

    /// Minimum number of header fields the type needs to be decoded.
    fn min_fields(&self) -> usize {
        match self {
            MessageType::PutChunk => 6,
            MessageType::Stored
            | MessageType::GetChunk
            | MessageType::Chunk
            | MessageType::Removed => 5,
            MessageType::Delete | MessageType::GetDeleted => 4,
        }
    }

    /// The group this type travels on.
    pub fn group(&self) -> Group {
        match self {
            MessageType::PutChunk => Group::Data,
            MessageType::Chunk => Group::Recovery,
            _ => Group::Control,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// Type-specific part of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    PutChunk {
        chunk_no: u32,
        replication_degree: u8,
        body: Bytes,
    },
    Stored {
        chunk_no: u32,
    },
    GetChunk {
        chunk_no: u32,
    },
    Chunk {
        chunk_no: u32,
        body: Bytes,
    },
    Delete,
    Removed {
        chunk_no: u32,
    },
    GetDeleted,
}

/// A protocol message. Built once, encoded, sent, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: Version,
    pub sender_id: PeerId,
    pub file_id: FileId,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(version: Version, sender_id: PeerId, file_id: FileId, kind: MessageKind) -> Self {
        Self {
            version,
            sender_id,
            file_id,
            kind,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self.kind {
            MessageKind::PutChunk { .. } => MessageType::PutChunk,
            MessageKind::Stored { .. } => MessageType::Stored,
            MessageKind::GetChunk { .. } => MessageType::GetChunk,
            MessageKind::Chunk { .. } => MessageType::Chunk,
            MessageKind::Delete => MessageType::Delete,
            MessageKind::Removed { .. } => MessageType::Removed,
            MessageKind::GetDeleted => MessageType::GetDeleted,
        }
    }

    pub fn chunk_no(&self) -> Option<u32> {
        match self.kind {
            MessageKind::PutChunk { chunk_no, .. }
            | MessageKind::Stored { chunk_no }
            | MessageKind::GetChunk { chunk_no }
            | MessageKind::Chunk { chunk_no, .. }
            | MessageKind::Removed { chunk_no } => Some(chunk_no),
            MessageKind::Delete | MessageKind::GetDeleted => None,
        }
    }

    /// `(fileId, chunkNo)` for chunk-scoped messages.
    pub fn chunk_key(&self) -> Option<ChunkKey> {
        self.chunk_no()
            .map(|chunk_no| ChunkKey::new(self.file_id.clone(), chunk_no))
    }

    pub fn replication_degree(&self) -> Option<u8> {
        match self.kind {
            MessageKind::PutChunk {
                replication_degree, ..
            } => Some(replication_degree),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        match &self.kind {
            MessageKind::PutChunk { body, .. } | MessageKind::Chunk { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Serialize to a datagram.
    pub fn encode(&self) -> Bytes {
        let header = format!(
            "{} {} {} {} {} {}",
            self.message_type().token(),
            self.version,
            self.sender_id,
            self.file_id,
            self.chunk_no().unwrap_or(0),
            self.replication_degree().unwrap_or(0),
        );
        let body_len = self.body().map(|b| b.len()).unwrap_or(0);

        let mut buf = BytesMut::with_capacity(header.len() + HEADER_TERMINATOR.len() + body_len);
        buf.put_slice(header.as_bytes());
        buf.put_slice(HEADER_TERMINATOR);
        if let Some(body) = self.body() {
            buf.put_slice(body);
        }
        buf.freeze()
    }

    /// Parse a datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let split = datagram
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR)
            .ok_or_else(|| WireError::Malformed("missing header terminator".into()))?;

        let header = std::str::from_utf8(&datagram[..split])
            .map_err(|_| WireError::Malformed("header is not ASCII".into()))?;
        let fields: Vec<&str> = header.split_ascii_whitespace().collect();

        let token = *fields
            .first()
            .ok_or_else(|| WireError::Malformed("empty header".into()))?;
        let message_type = MessageType::from_token(token)
            .ok_or_else(|| WireError::UnknownType(token.to_string()))?;

        if fields.len() < message_type.min_fields() {
            return Err(WireError::Malformed(format!(
                "{} needs {} header fields, got {}",
                token,
                message_type.min_fields(),
                fields.len()
            )));
        }

        let version: Version = fields[1].parse()?;
        let sender_id: PeerId = parse_field(fields[2], "sender id")?;
        let file_id = FileId::parse(fields[3])?;
        let body = || Bytes::copy_from_slice(&datagram[split + HEADER_TERMINATOR.len()..]);

        let kind = match message_type {
            MessageType::PutChunk => MessageKind::PutChunk {
                chunk_no: parse_field(fields[4], "chunk number")?,
                replication_degree: parse_field(fields[5], "replication degree")?,
                body: body(),
            },
            MessageType::Stored => MessageKind::Stored {
                chunk_no: parse_field(fields[4], "chunk number")?,
            },
            MessageType::GetChunk => MessageKind::GetChunk {
                chunk_no: parse_field(fields[4], "chunk number")?,
            },
            MessageType::Chunk => MessageKind::Chunk {
                chunk_no: parse_field(fields[4], "chunk number")?,
                body: body(),
            },
            MessageType::Delete => MessageKind::Delete,
            MessageType::Removed => MessageKind::Removed {
                chunk_no: parse_field(fields[4], "chunk number")?,
            },
            MessageType::GetDeleted => MessageKind::GetDeleted,
        };

        Ok(Self {
            version,
            sender_id,
            file_id,
            kind,
        })
    }
}

fn parse_field<T: FromStr>(value: &str, what: &str) -> Result<T, WireError> {
    value
        .parse()
        .map_err(|_| WireError::Malformed(format!("invalid {what}: {value:?}")))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type: {0:?}")]
    UnknownType(String),

    #[error("invalid file id: {0:?}")]
    InvalidFileId(String),

    #[error("invalid protocol version: {0:?}")]
    InvalidVersion(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
