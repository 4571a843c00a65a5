//! Error types for objcast.

use thiserror::Error;

use crate::codec::CodecError;
use crate::transport::TransportError;

/// Errors raised by [`ByteBuffer`](super::ByteBuffer) reads and writes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Not enough unread bytes for the requested value.
    #[error("buffer underrun: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// String payload is not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// String is too long for its u16 length prefix.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),
}

/// Top-level objcast errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Object codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server socket error.
    #[cfg(feature = "server")]
    #[error("server error: {0}")]
    Server(#[from] crate::server::ServerError),

    /// Client socket error.
    #[cfg(feature = "client")]
    #[error("client error: {0}")]
    Client(#[from] crate::client::ClientError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
