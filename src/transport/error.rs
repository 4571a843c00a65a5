//! Transport layer error types.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use super::header::FrameError;
use crate::codec::CodecError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame parsing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The payload could not be decoded; the peer's stream is dead.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Zero-length datagram.
    #[error("empty datagram")]
    EmptyDatagram,

    /// Source address cannot be replied to.
    #[error("datagram has no resolvable source: {0}")]
    UnresolvableSource(SocketAddr),

    /// Datagram on a per-peer or pooled channel from a peer not assigned there.
    #[error("datagram from unknown peer {0}")]
    UnknownPeer(SocketAddr),

    /// Encoded datagram exceeds the connection's size limit; nothing was sent.
    #[error("datagram of {len} bytes exceeds limit of {limit}")]
    Oversize {
        /// Encoded size, header included.
        len: usize,
        /// Largest datagram allowed.
        limit: usize,
    },

    /// Socket or receive loop is gone.
    #[error("connection closed")]
    ConnectionClosed,
}

impl TransportError {
    /// Whether the datagram is dropped with a log line and never reaches the
    /// application.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            TransportError::Frame(_)
                | TransportError::EmptyDatagram
                | TransportError::UnresolvableSource(_)
                | TransportError::UnknownPeer(_)
        )
    }

    /// Whether the affected connection cannot continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Codec(err) => err.is_fatal(),
            TransportError::ConnectionClosed => true,
            _ => false,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
