//! Type registry: the name-to-codec table both peers populate at startup.
//!
//! The writer looks types up by [`TypeId`] to learn their wire name; the
//! reader looks them up by name to find a decoder. Aliases let a reader
//! accept names an older peer still sends.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use crate::core::{ByteBuffer, Streamable, StreamableType};

use super::error::{CodecError, CodecResult};
use super::reader::ObjectReader;

/// Decoder entry point for one registered type.
pub type DecodeFn = fn(&mut ObjectReader, &mut ByteBuffer) -> CodecResult<Box<dyn Streamable>>;

fn decode_boxed<T: StreamableType>(
    reader: &mut ObjectReader,
    buf: &mut ByteBuffer,
) -> CodecResult<Box<dyn Streamable>> {
    Ok(Box::new(T::read_fields(reader, buf)?))
}

/// Codec functions for one registered type.
#[derive(Clone, Copy)]
pub struct TypeEntry {
    name: &'static str,
    type_id: TypeId,
    decode: DecodeFn,
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

impl TypeEntry {
    /// Registered type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rust type identity.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Decoder for this type.
    pub fn decoder(&self) -> DecodeFn {
        self.decode
    }
}

/// Registry of every type that may cross the wire.
///
/// Build it once, wrap it in an `Arc`, and share it with every stream.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    by_name: HashMap<String, TypeEntry>,
    by_type: HashMap<TypeId, TypeEntry>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its `TYPE_NAME`.
    ///
    /// Registering the same type twice is a no-op.
    pub fn register<T: StreamableType>(&mut self) -> CodecResult<()> {
        let entry = TypeEntry {
            name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
            decode: decode_boxed::<T>,
        };
        self.insert_name(T::TYPE_NAME, entry)?;
        self.by_type.insert(entry.type_id, entry);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: StreamableType>(mut self) -> CodecResult<Self> {
        self.register::<T>()?;
        Ok(self)
    }

    /// Accept `alias` on the wire as another name for `T`.
    ///
    /// `T` must already be registered.
    pub fn register_alias<T: StreamableType>(&mut self, alias: impl Into<String>) -> CodecResult<()> {
        let entry = *self
            .by_type
            .get(&TypeId::of::<T>())
            .ok_or(CodecError::UnregisteredType(T::TYPE_NAME))?;
        self.insert_name(&alias.into(), entry)
    }

    fn insert_name(&mut self, name: &str, entry: TypeEntry) -> CodecResult<()> {
        match self.by_name.get(name) {
            Some(existing) if existing.type_id != entry.type_id => {
                Err(CodecError::DuplicateTypeName(name.to_owned()))
            }
            Some(_) => Ok(()),
            None => {
                self.by_name.insert(name.to_owned(), entry);
                Ok(())
            }
        }
    }

    /// Look up a type by wire name (registered name or alias).
    pub fn by_name(&self, name: &str) -> Option<&TypeEntry> {
        self.by_name.get(name)
    }

    /// Look up a type by Rust identity.
    pub fn by_type(&self, type_id: TypeId) -> Option<&TypeEntry> {
        self.by_type.get(&type_id)
    }

    /// Whether `T` is registered.
    pub fn contains<T: StreamableType>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered types (aliases excluded).
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Whether no type is registered.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
