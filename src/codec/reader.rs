//! Class-caching object reader.
//!
//! Mirrors [`ObjectWriter`](super::ObjectWriter): a negative code registers
//! (or re-confirms) the type name that follows it, a positive code must refer
//! to a mapping an earlier datagram already registered.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::core::{ByteBuffer, MAX_OBJECT_DEPTH, NULL_CODE, Streamable, StreamableType};

use super::error::{CodecError, CodecResult, MalformedData};
use super::registry::{TypeEntry, TypeRegistry};

/// Reader-side class mapping.
#[derive(Debug, Clone)]
struct ReadMapping {
    /// Name as received on the wire (may be an alias).
    wire_name: String,
    entry: TypeEntry,
}

/// Inbound half of a class-caching stream.
///
/// Not thread-safe; owned by exactly one connection.
#[derive(Debug)]
pub struct ObjectReader {
    registry: Arc<TypeRegistry>,
    /// Keyed by code magnitude.
    mappings: HashMap<i16, ReadMapping>,
    /// Non-null objects currently being decoded.
    depth: usize,
    failed: bool,
}

impl ObjectReader {
    /// Create a reader resolving type names through `registry`.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            mappings: HashMap::new(),
            depth: 0,
            failed: false,
        }
    }

    /// Read one object (or null) and everything it references.
    ///
    /// Any error leaves the stream unusable.
    pub fn read_object(&mut self, buf: &mut ByteBuffer) -> CodecResult<Option<Box<dyn Streamable>>> {
        if self.failed {
            return Err(CodecError::StreamFailed);
        }
        let result = self.read_inner(buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Read an object that must be a `T` or null.
    pub fn read_value<T: StreamableType>(&mut self, buf: &mut ByteBuffer) -> CodecResult<Option<T>> {
        let Some(obj) = self.read_object(buf)? else {
            return Ok(None);
        };
        let found = obj.stream_name();
        match obj.downcast::<T>() {
            Some(value) => Ok(Some(*value)),
            None => {
                self.failed = true;
                Err(MalformedData::TypeMismatch {
                    expected: T::TYPE_NAME,
                    found,
                }
                .into())
            }
        }
    }

    /// Read an object that must be a non-null `T`.
    pub fn read_required<T: StreamableType>(&mut self, buf: &mut ByteBuffer) -> CodecResult<T> {
        match self.read_value::<T>(buf)? {
            Some(value) => Ok(value),
            None => {
                self.failed = true;
                Err(MalformedData::UnexpectedNull(T::TYPE_NAME).into())
            }
        }
    }

    fn read_inner(&mut self, buf: &mut ByteBuffer) -> CodecResult<Option<Box<dyn Streamable>>> {
        let code = buf.get_i16()?;
        let entry = match code {
            NULL_CODE => return Ok(None),
            i16::MIN => return Err(MalformedData::InvalidCode(code).into()),
            c if c < 0 => {
                let name = buf.get_string()?;
                self.register(-c, name)?
            }
            c => {
                self.mappings
                    .get(&c)
                    .ok_or(CodecError::UnknownClassCode(c))?
                    .entry
            }
        };

        if self.depth >= MAX_OBJECT_DEPTH {
            return Err(MalformedData::TooDeep(MAX_OBJECT_DEPTH).into());
        }
        self.depth += 1;
        let decode = entry.decoder();
        let result = decode(self, buf).map(Some);
        self.depth -= 1;
        result
    }

    fn register(&mut self, code: i16, wire_name: String) -> CodecResult<TypeEntry> {
        if let Some(existing) = self.mappings.get(&code) {
            if existing.wire_name != wire_name {
                return Err(CodecError::MetadataMismatch {
                    code,
                    registered: existing.wire_name.clone(),
                    received: wire_name,
                });
            }
            return Ok(existing.entry);
        }

        let entry = *self
            .registry
            .by_name(&wire_name)
            .ok_or_else(|| MalformedData::UnknownTypeName(wire_name.clone()))?;
        trace!(code, name = %wire_name, "registered class metadata");
        self.mappings.insert(code, ReadMapping { wire_name, entry });
        Ok(entry)
    }

    /// Type name bound to `code`, if its metadata has arrived.
    pub fn name_of(&self, code: i16) -> Option<&str> {
        self.mappings.get(&code).map(|m| m.wire_name.as_str())
    }

    /// Number of codes this stream has learned.
    pub fn known_codes(&self) -> usize {
        self.mappings.len()
    }

    /// Whether an earlier error made this stream unusable.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Registry shared with this reader.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }
}
