//! Class-caching object writer.
//!
//! Every type gets a small code the first time this stream writes it. Until
//! the application confirms the peer has cached the type's metadata, the code
//! is stored negated and the type name rides along once per round.
//!
//! ```text
//! null                    -> [0]
//! unconfirmed, 1st/round  -> [-code][u16 len][type name][fields...]
//! unconfirmed, repeat     -> [+code][fields...]
//! confirmed               -> [+code][fields...]
//! ```

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::core::{
    ByteBuffer, MAX_CLASS_CODE, MAX_OBJECT_DEPTH, NULL_CODE, Streamable, StreamableType,
};

use super::error::{CodecError, CodecResult, MalformedData};
use super::registry::TypeRegistry;

/// Writer-side class mapping.
#[derive(Debug, Clone, Copy)]
struct ClassMapping {
    /// Negative until the peer confirmed caching.
    code: i16,
    name: &'static str,
}

/// Types whose metadata went out during the current round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSet {
    types: HashSet<TypeId>,
}

impl MetadataSet {
    /// Whether metadata for `type_id` was sent this round.
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.types.contains(&type_id)
    }

    /// Number of types sent this round.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no metadata was sent this round.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Types sent this round, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.types.iter().copied()
    }

    /// Forget everything sent this round.
    pub fn clear(&mut self) {
        self.types.clear();
    }

    fn insert(&mut self, type_id: TypeId) {
        self.types.insert(type_id);
    }

    fn remove(&mut self, type_id: TypeId) {
        self.types.remove(&type_id);
    }
}

impl IntoIterator for MetadataSet {
    type Item = TypeId;
    type IntoIter = std::collections::hash_set::IntoIter<TypeId>;

    fn into_iter(self) -> Self::IntoIter {
        self.types.into_iter()
    }
}

/// Outbound half of a class-caching stream.
///
/// Not thread-safe; owned by exactly one connection.
#[derive(Debug)]
pub struct ObjectWriter {
    registry: Arc<TypeRegistry>,
    mappings: HashMap<TypeId, ClassMapping>,
    /// Magnitude of the last assigned code.
    last_code: i16,
    round: MetadataSet,
    /// Round entries added since the last [`checkpoint`](Self::checkpoint).
    journal: Vec<TypeId>,
    renames: HashMap<&'static str, String>,
    /// Non-null objects currently being written.
    depth: usize,
    failed: bool,
}

/// Writer state captured before encoding a datagram.
///
/// Restoring it with [`ObjectWriter::rollback`] forgets everything the
/// datagram would have told the peer, for datagrams that were never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    last_code: i16,
}

impl ObjectWriter {
    /// Create a writer resolving types through `registry`.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            mappings: HashMap::new(),
            last_code: NULL_CODE,
            round: MetadataSet::default(),
            journal: Vec::new(),
            renames: HashMap::new(),
            depth: 0,
            failed: false,
        }
    }

    /// Send `wire_name` instead of `T`'s registered name.
    ///
    /// Used when the peer still knows the type under an older name.
    pub fn rename<T: StreamableType>(&mut self, wire_name: impl Into<String>) {
        self.renames.insert(T::TYPE_NAME, wire_name.into());
    }

    /// Builder-style rename table.
    pub fn with_renames<I, S>(mut self, renames: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, S)>,
        S: Into<String>,
    {
        self.renames
            .extend(renames.into_iter().map(|(from, to)| (from, to.into())));
        self
    }

    /// Write one object (or null) and, recursively, everything it references.
    ///
    /// Any error leaves the stream unusable.
    pub fn write_object(
        &mut self,
        obj: Option<&dyn Streamable>,
        buf: &mut ByteBuffer,
    ) -> CodecResult<()> {
        if self.failed {
            return Err(CodecError::StreamFailed);
        }
        let result = self.write_inner(obj, buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// Typed convenience for [`write_object`](Self::write_object).
    pub fn write_value<T: StreamableType>(
        &mut self,
        value: Option<&T>,
        buf: &mut ByteBuffer,
    ) -> CodecResult<()> {
        self.write_object(value.map(|v| v as &dyn Streamable), buf)
    }

    fn write_inner(&mut self, obj: Option<&dyn Streamable>, buf: &mut ByteBuffer) -> CodecResult<()> {
        let Some(obj) = obj else {
            buf.put_i16(NULL_CODE);
            return Ok(());
        };

        let type_id = obj.as_any().type_id();
        let mapping = match self.mappings.get(&type_id) {
            Some(mapping) => *mapping,
            None => self.allocate(type_id, obj.stream_name())?,
        };

        if mapping.code > 0 || self.round.contains(type_id) {
            buf.put_i16(mapping.code.abs());
        } else {
            let wire_name = self
                .renames
                .get(mapping.name)
                .map_or(mapping.name, String::as_str);
            trace!(code = -mapping.code, name = wire_name, "writing class metadata");
            buf.put_i16(mapping.code);
            buf.put_str(wire_name)?;
            self.round.insert(type_id);
            self.journal.push(type_id);
        }

        if self.depth >= MAX_OBJECT_DEPTH {
            return Err(MalformedData::TooDeep(MAX_OBJECT_DEPTH).into());
        }
        self.depth += 1;
        let result = obj.stream_fields(self, buf);
        self.depth -= 1;
        result
    }

    fn allocate(&mut self, type_id: TypeId, name: &'static str) -> CodecResult<ClassMapping> {
        let entry = self
            .registry
            .by_type(type_id)
            .ok_or(CodecError::UnregisteredType(name))?;
        if self.last_code >= MAX_CLASS_CODE {
            return Err(CodecError::CodeSpaceExhausted);
        }
        self.last_code += 1;

        let mapping = ClassMapping {
            code: -self.last_code,
            name: entry.name(),
        };
        self.mappings.insert(type_id, mapping);
        Ok(mapping)
    }

    /// Record that the peer has durably cached metadata for `types`.
    ///
    /// From now on those types are sent as bare codes. Every type must
    /// already have been written on this stream.
    pub fn note_metadata_cached<I>(&mut self, types: I) -> CodecResult<()>
    where
        I: IntoIterator<Item = TypeId>,
    {
        if self.failed {
            return Err(CodecError::StreamFailed);
        }
        for type_id in types {
            let Some(mapping) = self.mappings.get_mut(&type_id) else {
                self.failed = true;
                return Err(CodecError::NotMapped(format!("{type_id:?}")));
            };
            mapping.code = mapping.code.abs();
        }
        Ok(())
    }

    /// Typed convenience for [`note_metadata_cached`](Self::note_metadata_cached).
    pub fn note_cached<T: StreamableType>(&mut self) -> CodecResult<()> {
        if !self.mappings.contains_key(&TypeId::of::<T>()) {
            self.failed = true;
            return Err(CodecError::NotMapped(T::TYPE_NAME.to_owned()));
        }
        self.note_metadata_cached([TypeId::of::<T>()])
    }

    /// Types whose metadata was sent this round.
    pub fn round(&self) -> &MetadataSet {
        &self.round
    }

    /// Start a new round: metadata for unconfirmed types goes out again.
    pub fn begin_round(&mut self) {
        self.round.clear();
        self.journal.clear();
    }

    /// End the round, returning the types whose metadata it carried.
    ///
    /// Hand the set back to [`note_metadata_cached`](Self::note_metadata_cached)
    /// once the peer acknowledges the datagrams that carried it.
    pub fn take_round(&mut self) -> MetadataSet {
        self.journal.clear();
        std::mem::take(&mut self.round)
    }

    /// Mark the start of a datagram.
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.journal.clear();
        Checkpoint {
            last_code: self.last_code,
        }
    }

    /// Undo the code allocations and round entries made since `checkpoint`.
    ///
    /// Only for datagrams that never left the host; anything the peer may
    /// have seen must stay recorded. A stream that already failed stays
    /// failed.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        for type_id in self.journal.drain(..) {
            self.round.remove(type_id);
        }
        self.mappings
            .retain(|_, mapping| mapping.code.abs() <= checkpoint.last_code);
        self.last_code = checkpoint.last_code;
    }

    /// Current wire code for `T`, if it has been written.
    ///
    /// Negative while the metadata is unconfirmed.
    pub fn code_of<T: StreamableType>(&self) -> Option<i16> {
        self.mappings.get(&TypeId::of::<T>()).map(|m| m.code)
    }

    /// Number of types this stream has assigned codes to.
    pub fn mapped_types(&self) -> usize {
        self.mappings.len()
    }

    /// Whether an earlier error made this stream unusable.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Registry shared with this writer.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }
}
