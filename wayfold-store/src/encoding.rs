//! `bincode` configuration shared by the bucket and way encodings.
//!
//! Records use varint integers (zigzag for signed values), so small deltas
//! take a byte or two. Raw bucket slots use fixed-width integers to keep
//! every slot the same size.

use bincode::Options;
use thiserror::Error;

/// Errors raised while encoding or decoding a stored record.
#[derive(Debug, Error)]
pub enum CodecError {
    /// `bincode` could not encode a record.
    #[error("failed to encode record")]
    Encode {
        /// Source error from `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// `bincode` could not decode a record.
    #[error("failed to decode record")]
    Decode {
        /// Source error from `bincode`.
        #[source]
        source: bincode::Error,
    },
    /// A decoded coordinate did not fit in fixed point.
    #[error("decoded coordinate component {value} out of range")]
    OutOfRange {
        /// Offending value.
        value: i64,
    },
}

/// Options for variable-length records.
pub(crate) fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
}

/// Options for fixed-width slots.
pub(crate) fn fixed_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Append the varint encoding of `value` to `buf`.
pub(crate) fn encode_into<T: serde::Serialize + ?Sized>(
    buf: &mut Vec<u8>,
    value: &T,
) -> Result<(), CodecError> {
    bincode_options()
        .serialize_into(buf, value)
        .map_err(|source| CodecError::Encode { source })
}

/// Decode a record written by [`encode_into`]; trailing bytes are rejected.
pub(crate) fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CodecError> {
    bincode_options()
        .deserialize(bytes)
        .map_err(|source| CodecError::Decode { source })
}

/// Add a decoded delta to a running fixed-point component.
pub(crate) fn fixed_component(running: &mut i64, delta: i64) -> Result<i32, CodecError> {
    *running = running.wrapping_add(delta);
    i32::try_from(*running).map_err(|_| CodecError::OutOfRange { value: *running })
}
