//! objcast - Class-Cache Codec
//!
//! Serializes object graphs into [`ByteBuffer`](crate::core::ByteBuffer)s
//! while amortizing type metadata over an unreliable channel:
//!
//! - [`ObjectWriter`] assigns each type a small code and sends its name only
//!   until the application confirms the peer cached it
//! - [`ObjectReader`] learns codes from the metadata it receives and rejects
//!   bare codes it has never seen
//! - [`TypeRegistry`] replaces name-based reflection with explicit
//!   registration
//!
//! The codec has no notion of acknowledgment. Call
//! [`ObjectWriter::note_metadata_cached`] once the application has proof the
//! peer received the datagrams that carried a round's metadata.

mod error;
mod reader;
mod registry;
mod writer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::*;
pub use reader::ObjectReader;
pub use registry::{DecodeFn, TypeEntry, TypeRegistry};
pub use writer::{Checkpoint, MetadataSet, ObjectWriter};
