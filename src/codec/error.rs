//! Object codec error types.
//!
//! Every codec error is fatal to the stream that raised it. The writer or
//! reader refuses further use afterwards, and the owning connection should be
//! dropped; other streams are unaffected.

use thiserror::Error;

use crate::core::BufferError;

/// Low-level decode failures, always surfaced as [`CodecError::Malformed`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedData {
    /// Buffer read or write failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Class metadata names a type the registry does not know.
    #[error("unknown type name: {0}")]
    UnknownTypeName(String),

    /// Decoded object is not the type the field expects.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type the caller asked for.
        expected: &'static str,
        /// Type that was decoded.
        found: &'static str,
    },

    /// A required field was encoded as null.
    #[error("unexpected null for {0}")]
    UnexpectedNull(&'static str),

    /// Code cannot be produced by a conforming writer.
    #[error("invalid class code {0}")]
    InvalidCode(i16),

    /// Objects nest deeper than the stream allows.
    #[error("object graph nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Object codec errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// All class codes of this stream are in use.
    #[error("class code space exhausted - stream must be abandoned")]
    CodeSpaceExhausted,

    /// Writing a type that was never registered.
    #[error("type {0} is not registered")]
    UnregisteredType(&'static str),

    /// Registering a second type under an existing name.
    #[error("type name {0} is already registered")]
    DuplicateTypeName(String),

    /// Confirming metadata for a type this writer never mapped.
    #[error("no class mapping for {0}")]
    NotMapped(String),

    /// Bare code arrived before its metadata was ever received.
    #[error("received object code {0} with no registered metadata")]
    UnknownClassCode(i16),

    /// Metadata for a known code names a different type.
    #[error("class code {code} is bound to {registered}, received {received}")]
    MetadataMismatch {
        /// Code magnitude.
        code: i16,
        /// Name already bound to the code.
        registered: String,
        /// Name carried by the new metadata.
        received: String,
    },

    /// Malformed object data.
    #[error("malformed object data: {0}")]
    Malformed(#[from] MalformedData),

    /// The stream failed earlier and cannot be used.
    #[error("stream failed earlier and must be discarded")]
    StreamFailed,
}

impl CodecError {
    /// Whether the stream that raised this error is now unusable.
    ///
    /// Only registry setup errors leave streams untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CodecError::DuplicateTypeName(_))
    }
}

impl From<BufferError> for CodecError {
    fn from(err: BufferError) -> Self {
        CodecError::Malformed(MalformedData::Buffer(err))
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
