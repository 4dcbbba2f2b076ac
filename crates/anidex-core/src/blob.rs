//! Versioned blob framing for structured values
//!
//! Structured and enum-like values are stored as a framed CBOR payload:
//!
//! ```text
//! byte 0      format tag
//! bytes 1..5  payload length, u32 big-endian
//! bytes 5..   CBOR payload
//! ```
//!
//! The tag lets a value type change its payload layout later without
//! misreading older blobs: an unknown tag is a decode error, not garbage.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DecodeError;

/// Size of the frame header (tag + length)
pub const HEADER_LEN: usize = 5;

/// Largest payload a frame may declare
pub const MAX_BLOB_LEN: usize = 16 * 1024 * 1024;

/// Largest blob the store writes, framed or raw
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_BLOB_LEN;

/// Frame a value under the given format tag
pub fn encode_frame<T: Serialize>(tag: u8, value: &T) -> Vec<u8> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload).expect("CBOR encoding into memory failed");

    // an oversized payload gets a length that cannot match, so decoding rejects it
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(tag);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Read a frame written with `tag`
pub fn decode_frame<T: DeserializeOwned>(tag: u8, bytes: &[u8]) -> Result<T, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Malformed(format!(
            "blob of {} bytes is shorter than its header",
            bytes.len()
        )));
    }

    let found = bytes[0];
    if found != tag {
        return Err(DecodeError::UnsupportedFormat {
            found,
            expected: tag,
        });
    }

    let declared = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if declared > MAX_BLOB_LEN {
        return Err(DecodeError::Malformed(format!(
            "blob declares {declared} bytes, above the {MAX_BLOB_LEN} byte limit"
        )));
    }

    let payload = &bytes[HEADER_LEN..];
    if payload.len() != declared {
        return Err(DecodeError::Malformed(format!(
            "blob declares {declared} payload bytes but carries {}",
            payload.len()
        )));
    }

    ciborium::from_reader(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Implement [`Codec`](crate::codec::Codec) for a serde type as a framed blob
///
/// ```ignore
/// blob_codec!(ImageSet, 1);
/// ```
#[macro_export]
macro_rules! blob_codec {
    ($ty:ty, $tag:expr) => {
        impl $crate::codec::Codec for $ty {
            const KIND: $crate::value::ColumnKind = $crate::value::ColumnKind::Blob;

            fn encode(&self) -> $crate::value::Primitive {
                $crate::value::Primitive::Blob($crate::blob::encode_frame($tag, self))
            }

            fn decode(
                primitive: $crate::value::Primitive,
            ) -> ::std::result::Result<Self, $crate::error::DecodeError> {
                match primitive {
                    $crate::value::Primitive::Blob(bytes) => {
                        $crate::blob::decode_frame($tag, &bytes)
                    }
                    other => Err(other.mismatch($crate::value::ColumnKind::Blob)),
                }
            }
        }
    };
}
