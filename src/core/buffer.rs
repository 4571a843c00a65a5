//! Reusable byte buffer shared by the datagram header and the object codec.
//!
//! A [`ByteBuffer`] is owned by the caller and handed into every encode and
//! decode call, so one allocation serves an entire connection's lifetime.
//! All multi-byte values are big-endian.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::MAX_STRING_LEN;
use super::error::BufferError;

macro_rules! put_be {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Append a big-endian `", stringify!($ty), "`.")]
        pub fn $name(&mut self, value: $ty) {
            self.data.$name(value);
        }
    };
}

macro_rules! get_be {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Read a big-endian `", stringify!($ty), "`.")]
        pub fn $name(&mut self) -> Result<$ty, BufferError> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            self.require(WIDTH)?;
            let mut src = &self.data[self.read_pos..];
            let value = src.$name();
            self.read_pos += WIDTH;
            Ok(value)
        }
    };
}

/// Growable byte buffer with an independent read cursor.
///
/// Writes always append; reads consume from the cursor. [`clear`](Self::clear)
/// and [`load`](Self::load) reset both while keeping the allocation.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: BytesMut,
    read_pos: usize,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Create a buffer holding a copy of `bytes`, ready for reading.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::with_capacity(bytes.len());
        buffer.data.extend_from_slice(bytes);
        buffer
    }

    /// Drop all content and rewind the read cursor.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Replace the content with `bytes` and rewind the read cursor.
    pub fn load(&mut self, bytes: &[u8]) {
        self.clear();
        self.data.extend_from_slice(bytes);
    }

    /// Everything written so far, regardless of the read cursor.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Bytes not yet consumed by reads.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Total bytes written.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Current read cursor.
    pub fn position(&self) -> usize {
        self.read_pos
    }

    fn require(&self, needed: usize) -> Result<(), BufferError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(BufferError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    put_be!(put_u8, u8);
    put_be!(put_i16, i16);
    put_be!(put_u16, u16);
    put_be!(put_i32, i32);
    put_be!(put_u32, u32);
    put_be!(put_i64, i64);
    put_be!(put_u64, u64);
    put_be!(put_f32, f32);
    put_be!(put_f64, f64);

    get_be!(get_u8, u8);
    get_be!(get_i16, i16);
    get_be!(get_u16, u16);
    get_be!(get_i32, i32);
    get_be!(get_u32, u32);
    get_be!(get_i64, i64);
    get_be!(get_u64, u64);
    get_be!(get_f32, f32);
    get_be!(get_f64, f64);

    /// Append a bool as a single byte.
    pub fn put_bool(&mut self, value: bool) {
        self.data.put_u8(u8::from(value));
    }

    /// Read a single-byte bool (any non-zero byte is `true`).
    pub fn get_bool(&mut self) -> Result<bool, BufferError> {
        Ok(self.get_u8()? != 0)
    }

    /// Append raw bytes.
    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Read `len` raw bytes.
    pub fn get_slice(&mut self, len: usize) -> Result<&[u8], BufferError> {
        self.require(len)?;
        let start = self.read_pos;
        self.read_pos += len;
        Ok(&self.data[start..self.read_pos])
    }

    /// Append a u16 length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) -> Result<(), BufferError> {
        if value.len() > MAX_STRING_LEN {
            return Err(BufferError::StringTooLong(value.len()));
        }
        self.data.put_u16(value.len() as u16);
        self.data.put_slice(value.as_bytes());
        Ok(())
    }

    /// Read a u16 length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String, BufferError> {
        let len = self.get_u16()? as usize;
        let bytes = self.get_slice(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| BufferError::InvalidUtf8)
    }
}
