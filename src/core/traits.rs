//! Core traits for objcast.
//!
//! Application types implement [`StreamableType`] to travel through the
//! object codec. The codec itself only ever sees the object-safe
//! [`Streamable`], which every `StreamableType` gets for free.

use std::any::Any;
use std::fmt::Debug;

use crate::codec::{CodecResult, ObjectReader, ObjectWriter};

use super::buffer::ByteBuffer;

/// A concrete type the object codec can send and receive.
///
/// `write_fields` and `read_fields` describe only the type's own fields.
/// Nested objects are written with [`ObjectWriter::write_object`] and read
/// with [`ObjectReader::read_object`], which lets graphs of any depth share
/// one stream's class table.
///
/// # Requirements
///
/// - `TYPE_NAME` MUST be unique within a [`TypeRegistry`](crate::codec::TypeRegistry)
/// - `read_fields` MUST consume exactly what `write_fields` produced
///
/// # Example
///
/// ```
/// use objcast::codec::{CodecResult, ObjectReader, ObjectWriter};
/// use objcast::core::{ByteBuffer, StreamableType};
///
/// #[derive(Debug, PartialEq)]
/// struct Position { x: f32, y: f32 }
///
/// impl StreamableType for Position {
///     const TYPE_NAME: &'static str = "game.Position";
///
///     fn write_fields(&self, _: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()> {
///         buf.put_f32(self.x);
///         buf.put_f32(self.y);
///         Ok(())
///     }
///
///     fn read_fields(_: &mut ObjectReader, buf: &mut ByteBuffer) -> CodecResult<Self> {
///         Ok(Position { x: buf.get_f32()?, y: buf.get_f32()? })
///     }
/// }
/// ```
pub trait StreamableType: Any + Debug + Send + Sized {
    /// Fully-qualified name sent as class metadata.
    const TYPE_NAME: &'static str;

    /// Serialize this value's fields.
    fn write_fields(&self, writer: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()>;

    /// Deserialize a value from its fields.
    fn read_fields(reader: &mut ObjectReader, buf: &mut ByteBuffer) -> CodecResult<Self>;
}

/// Object-safe view of a [`StreamableType`].
pub trait Streamable: Any + Debug + Send {
    /// The registered type name.
    fn stream_name(&self) -> &'static str;

    /// Serialize this value's fields.
    fn stream_fields(&self, writer: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()>;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Owned upcast for downcasting to the concrete type.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: StreamableType> Streamable for T {
    fn stream_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn stream_fields(&self, writer: &mut ObjectWriter, buf: &mut ByteBuffer) -> CodecResult<()> {
        self.write_fields(writer, buf)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn Streamable {
    /// Whether the object is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow the object as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Take the object as a `T`.
    pub fn downcast<T: Any>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}
