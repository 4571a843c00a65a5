//! # objcast
//!
//! Datagram remote-object transport for synchronizing game state over UDP.
//!
//! - **Delivery descriptors**: interned [`Transport`] values that classify and
//!   combine reliability and ordering guarantees
//! - **Class-cache codec**: object graphs are written with small per-stream
//!   type codes; type names travel only until the application confirms the
//!   peer cached them
//! - **Connection multiplexing**: one or more UDP sockets demultiplexed by
//!   source address into per-peer logical connections
//!
//! ## Feature Flags
//!
//! - `transport` (default): tokio UDP socket wrapper
//! - `server` (default): [`server::ServerSocket`] multiplexer
//! - `client` (default): [`client::ClientSocket`]
//!
//! Descriptors, framing, link state and the codec are always available.
//!
//! ## Modules
//!
//! - [`core`]: Byte buffer, streamable traits, constants, top-level error
//! - [`codec`]: Type registry, object writer and reader
//! - [`transport`]: Descriptors, datagram header, logical connections, sockets
//! - [`server`]: Multiplexing server socket (requires `server` feature)
//! - [`client`]: Client socket (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use objcast::prelude::*;
//!
//! #[derive(Debug, PartialEq)]
//! struct Score {
//!     points: u32,
//! }
//!
//! impl StreamableType for Score {
//!     const TYPE_NAME: &'static str = "example.Score";
//!
//!     fn write_fields(&self, _: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()> {
//!         buf.put_u32(self.points);
//!         Ok(())
//!     }
//!
//!     fn read_fields(_: &mut ObjectReader, buf: &mut ByteBuffer) -> CodecResult<Self> {
//!         Ok(Score { points: buf.get_u32()? })
//!     }
//! }
//!
//! let registry = Arc::new(TypeRegistry::new().with::<Score>().unwrap());
//! let mut writer = ObjectWriter::new(Arc::clone(&registry));
//! let mut reader = ObjectReader::new(registry);
//!
//! let mut buf = ByteBuffer::new();
//! writer.write_value(Some(&Score { points: 7 }), &mut buf).unwrap();
//! assert_eq!(reader.read_value::<Score>(&mut buf).unwrap(), Some(Score { points: 7 }));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Object codec (always included)
pub mod codec;

// Descriptors, framing and connections; sockets are feature-gated inside
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::codec::{
        CodecError, CodecResult, MalformedData, MetadataSet, ObjectReader, ObjectWriter,
        TypeRegistry,
    };

    pub use crate::transport::{
        Arrival, DatagramHeader, LogicalConnection, Received, Transport, TransportError,
        TransportResult, TransportType,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{DatagramSocket, DatagramSocketBuilder};

    #[cfg(feature = "server")]
    pub use crate::server::{
        ServerConfig, ServerError, ServerEvent, ServerSocket, ServerSocketBuilder,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{ClientConfig, ClientError, ClientSocket, ClientSocketBuilder};
}

// Re-export commonly used items at crate root
pub use crate::codec::{CodecError, ObjectReader, ObjectWriter, TypeRegistry};
pub use crate::core::{ByteBuffer, Error, Streamable, StreamableType};
pub use crate::transport::{DatagramHeader, Transport, TransportType};
