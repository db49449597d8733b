//! Binary frame and parameter codec.
//!
//! Serializes and deserializes [`Frame`]s to and from the checksummed
//! wire representation used on the bus. The format is big-endian
//! throughout; see [`wire`] for the exact layout.

mod frame;
mod param;
pub mod wire;

pub use frame::{Address, Frame};
pub use param::{Parameter, ParameterType, Struct, Value};
pub use wire::{DecodeOutcome, decode_frame, encode_frame, MIN_FRAME_LEN};

use thiserror::Error;

/// Maximum nesting depth accepted for struct parameters.
///
/// Bounds recursion against hostile or corrupted input.
pub const MAX_STRUCT_DEPTH: usize = 8;

/// Errors raised while building or decoding wire frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The declared frame length does not match the buffer length.
    #[error("frame length mismatch: declared {declared}, buffer is {actual} bytes")]
    LengthMismatch {
        /// Length from the leading 2-byte field.
        declared: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// The declared frame length exceeds the caller's acceptance limit.
    #[error("frame of {len} bytes exceeds maximum accepted length {max}")]
    Oversize {
        /// Declared frame length.
        len: usize,
        /// Maximum the caller accepts.
        max: usize,
    },

    /// The trailing checksum byte does not match the byte sum.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame body.
        expected: u8,
        /// Checksum byte found on the wire.
        actual: u8,
    },

    /// Ran out of bytes while a field was still expected.
    #[error("unexpected end of frame data")]
    UnexpectedEof,

    /// The parameter type tag is not part of the enumeration.
    #[error("unknown parameter type tag: 0x{0:02x}")]
    UnknownTypeTag(u8),

    /// A frame-level parameter name appeared twice.
    #[error("duplicate parameter name '{}'", *.0 as char)]
    DuplicateParameter(u8),

    /// The name is reserved for the subject/command convention.
    #[error("parameter name '{}' is reserved at the frame level", *.0 as char)]
    ReservedParameterName(u8),

    /// No parameter named `'s'` was present on the wire.
    #[error("frame carries no subject parameter")]
    MissingSubject,

    /// No parameter named `'c'` was present on the wire.
    #[error("frame carries no command parameter")]
    MissingCommand,

    /// Struct nesting deeper than [`MAX_STRUCT_DEPTH`].
    #[error("struct nesting exceeds maximum depth {MAX_STRUCT_DEPTH}")]
    DepthExceeded,

    /// A struct length prefix disagrees with its actual body length.
    #[error("struct length mismatch: prefix says {declared}, body is {actual} bytes")]
    StructLengthMismatch {
        /// Length from the prefix.
        declared: usize,
        /// Bytes the body actually occupied.
        actual: usize,
    },

    /// A boolean payload byte was neither ASCII `'0'` nor `'1'`.
    #[error("invalid boolean payload: 0x{0:02x}")]
    InvalidBoolean(u8),

    /// String payload was not valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidString,

    /// A char payload or parameter value does not fit in one byte.
    #[error("character does not fit in a single byte: {0:?}")]
    CharOutOfRange(char),

    /// An address longer than 255 bytes cannot be length-prefixed.
    #[error("address of {0} bytes exceeds the 255-byte limit")]
    AddressTooLong(usize),

    /// More parameters than the 1-byte count field can carry.
    #[error("too many parameters: {0}")]
    TooManyParameters(usize),

    /// The encoded frame would exceed the 16-bit length field.
    #[error("encoded frame of {0} bytes exceeds the 16-bit length field")]
    FrameTooLarge(usize),

    /// A value payload does not fit the declared parameter type.
    #[error("value does not match parameter type {0:?}")]
    TypeMismatch(ParameterType),
}
