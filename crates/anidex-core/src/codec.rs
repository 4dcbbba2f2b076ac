//! Value codecs
//!
//! A codec converts a domain value to a storage primitive and back.
//! Codecs are pure and must satisfy `decode(encode(v)) == v`.
//!
//! Scalars map directly onto native column types. Structured values go
//! through [`crate::blob`]; see [`blob_codec!`](crate::blob_codec).
//!
//! Timestamps are [`Timestamp`] values at millisecond precision. Floating point values must not be
//! NaN: SQLite stores NaN as NULL.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::value::{ColumnKind, Primitive};

/// Bidirectional conversion between a value type and a storage primitive
pub trait Codec: Sized {
    /// Column storage class for this value
    const KIND: ColumnKind;

    /// Whether the encoded form may be `Null`
    const NULLABLE: bool = false;

    fn encode(&self) -> Primitive;

    fn decode(primitive: Primitive) -> Result<Self, DecodeError>;
}

impl Codec for i64 {
    const KIND: ColumnKind = ColumnKind::Integer;

    fn encode(&self) -> Primitive {
        Primitive::Integer(*self)
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        match primitive {
            Primitive::Integer(i) => Ok(i),
            other => Err(other.mismatch(Self::KIND)),
        }
    }
}

impl Codec for i32 {
    const KIND: ColumnKind = ColumnKind::Integer;

    fn encode(&self) -> Primitive {
        Primitive::Integer(i64::from(*self))
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        let value = i64::decode(primitive)?;
        i32::try_from(value).map_err(|_| DecodeError::OutOfRange {
            target: "i32",
            value,
        })
    }
}

impl Codec for u32 {
    const KIND: ColumnKind = ColumnKind::Integer;

    fn encode(&self) -> Primitive {
        Primitive::Integer(i64::from(*self))
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        let value = i64::decode(primitive)?;
        u32::try_from(value).map_err(|_| DecodeError::OutOfRange {
            target: "u32",
            value,
        })
    }
}

impl Codec for f64 {
    const KIND: ColumnKind = ColumnKind::Real;

    fn encode(&self) -> Primitive {
        Primitive::Real(*self)
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        match primitive {
            Primitive::Real(f) => Ok(f),
            other => Err(other.mismatch(Self::KIND)),
        }
    }
}

impl Codec for bool {
    const KIND: ColumnKind = ColumnKind::Bool;

    fn encode(&self) -> Primitive {
        Primitive::Bool(*self)
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        match primitive {
            Primitive::Bool(b) => Ok(b),
            // untyped reads of older rows
            Primitive::Integer(0) => Ok(false),
            Primitive::Integer(1) => Ok(true),
            Primitive::Integer(value) => Err(DecodeError::OutOfRange {
                target: "bool",
                value,
            }),
            other => Err(other.mismatch(Self::KIND)),
        }
    }
}

impl Codec for String {
    const KIND: ColumnKind = ColumnKind::Text;

    fn encode(&self) -> Primitive {
        Primitive::Text(self.clone())
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        match primitive {
            Primitive::Text(s) => Ok(s),
            other => Err(other.mismatch(Self::KIND)),
        }
    }
}

impl Codec for Vec<u8> {
    const KIND: ColumnKind = ColumnKind::Blob;

    fn encode(&self) -> Primitive {
        Primitive::Blob(self.clone())
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        match primitive {
            Primitive::Blob(b) => Ok(b),
            other => Err(other.mismatch(Self::KIND)),
        }
    }
}

/// A UTC instant at the millisecond precision the store keeps
///
/// Construction truncates to whole milliseconds, so every `Timestamp`
/// survives a round trip through the store unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Instant `millis` milliseconds after the Unix epoch, if representable
    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        // the millisecond floor of a valid instant is itself valid
        Self::from_millis(value.timestamp_millis()).unwrap_or(Self(value))
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Codec for Timestamp {
    const KIND: ColumnKind = ColumnKind::Timestamp;

    fn encode(&self) -> Primitive {
        Primitive::Timestamp(self.as_millis())
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        let millis = match primitive {
            Primitive::Timestamp(ms) | Primitive::Integer(ms) => ms,
            other => return Err(other.mismatch(Self::KIND)),
        };
        Self::from_millis(millis).ok_or(DecodeError::OutOfRange {
            target: "timestamp",
            value: millis,
        })
    }
}

impl Codec for Uuid {
    const KIND: ColumnKind = ColumnKind::Text;

    fn encode(&self) -> Primitive {
        Primitive::Text(self.hyphenated().to_string())
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        let text = String::decode(primitive)?;
        Uuid::parse_str(&text).map_err(|_| DecodeError::InvalidValue {
            target: "uuid",
            value: text,
        })
    }
}

/// Absent values encode as `Null`, never as a sentinel literal
impl<T: Codec> Codec for Option<T> {
    const KIND: ColumnKind = T::KIND;
    const NULLABLE: bool = true;

    fn encode(&self) -> Primitive {
        match self {
            Some(value) => value.encode(),
            None => Primitive::Null,
        }
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        match primitive {
            Primitive::Null => Ok(None),
            other => T::decode(other).map(Some),
        }
    }
}
