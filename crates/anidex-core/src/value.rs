//! Storage primitives
//!
//! Every domain value is stored as one of a small closed set of primitives.
//! `Null` is the explicit "absent" outcome and never doubles as a literal.

use std::fmt;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;

use crate::error::DecodeError;

/// Declared storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Integer,
    Real,
    Bool,
    Text,
    Blob,
    /// Milliseconds since the Unix epoch, UTC
    Timestamp,
}

impl ColumnKind {
    /// SQLite column type used in table definitions
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer | ColumnKind::Bool | ColumnKind::Timestamp => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
            ColumnKind::Blob => "BLOB",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Real => "real",
            ColumnKind::Bool => "bool",
            ColumnKind::Text => "text",
            ColumnKind::Blob => "blob",
            ColumnKind::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value in storage form
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Null,
    Integer(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(i64),
}

impl Primitive {
    pub fn is_null(&self) -> bool {
        matches!(self, Primitive::Null)
    }

    /// Short name of the variant, used in decode errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Primitive::Null => "null",
            Primitive::Integer(_) => "integer",
            Primitive::Real(_) => "real",
            Primitive::Bool(_) => "bool",
            Primitive::Text(_) => "text",
            Primitive::Blob(_) => "blob",
            Primitive::Timestamp(_) => "timestamp",
        }
    }

    /// Build the mismatch error for a codec expecting `expected`
    pub fn mismatch(&self, expected: ColumnKind) -> DecodeError {
        DecodeError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    /// Read a column value whose declared kind is known
    pub(crate) fn from_sql(value: ValueRef<'_>, kind: ColumnKind) -> Result<Self, DecodeError> {
        let found = match value {
            ValueRef::Null => return Ok(Primitive::Null),
            ValueRef::Integer(i) => match kind {
                ColumnKind::Integer => return Ok(Primitive::Integer(i)),
                ColumnKind::Timestamp => return Ok(Primitive::Timestamp(i)),
                ColumnKind::Real => return Ok(Primitive::Real(i as f64)),
                ColumnKind::Bool => {
                    return match i {
                        0 => Ok(Primitive::Bool(false)),
                        1 => Ok(Primitive::Bool(true)),
                        other => Err(DecodeError::OutOfRange {
                            target: "bool",
                            value: other,
                        }),
                    }
                }
                _ => "integer",
            },
            ValueRef::Real(f) => match kind {
                ColumnKind::Real => return Ok(Primitive::Real(f)),
                _ => "real",
            },
            ValueRef::Text(bytes) => match kind {
                ColumnKind::Text => {
                    return String::from_utf8(bytes.to_vec())
                        .map(Primitive::Text)
                        .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8 text: {e}")))
                }
                _ => "text",
            },
            ValueRef::Blob(bytes) => match kind {
                ColumnKind::Blob => return Ok(Primitive::Blob(bytes.to_vec())),
                _ => "blob",
            },
        };
        Err(DecodeError::TypeMismatch {
            expected: kind,
            found,
        })
    }

    /// Read a column value without knowing its declared kind
    ///
    /// Used for rows of older schema versions. Booleans and timestamps come
    /// back as integers; codecs for those kinds accept that form.
    pub(crate) fn from_raw(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Primitive::Null,
            ValueRef::Integer(i) => Primitive::Integer(i),
            ValueRef::Real(f) => Primitive::Real(f),
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => Primitive::Text(s.to_string()),
                Err(_) => Primitive::Blob(bytes.to_vec()),
            },
            ValueRef::Blob(bytes) => Primitive::Blob(bytes.to_vec()),
        }
    }
}

impl ToSql for Primitive {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Primitive::Null => ToSqlOutput::Owned(Value::Null),
            Primitive::Integer(i) | Primitive::Timestamp(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Primitive::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Primitive::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            Primitive::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Primitive::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_reads() {
        assert_eq!(
            Primitive::from_sql(ValueRef::Integer(1), ColumnKind::Bool).unwrap(),
            Primitive::Bool(true)
        );
        assert_eq!(
            Primitive::from_sql(ValueRef::Integer(1_700_000_000_000), ColumnKind::Timestamp).unwrap(),
            Primitive::Timestamp(1_700_000_000_000)
        );
        assert_eq!(
            Primitive::from_sql(ValueRef::Null, ColumnKind::Text).unwrap(),
            Primitive::Null
        );
        assert_eq!(
            Primitive::from_sql(ValueRef::Integer(3), ColumnKind::Real).unwrap(),
            Primitive::Real(3.0)
        );
    }

    #[test]
    fn test_typed_read_rejects_wrong_class() {
        let err = Primitive::from_sql(ValueRef::Text(b"x"), ColumnKind::Integer).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TypeMismatch {
                expected: ColumnKind::Integer,
                found: "text"
            }
        ));

        let err = Primitive::from_sql(ValueRef::Integer(2), ColumnKind::Bool).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { .. }));
    }

    #[test]
    fn test_round_trip_through_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (b INTEGER, ts INTEGER, x BLOB, s TEXT)")
            .unwrap();
        conn.execute(
            "INSERT INTO t VALUES (?, ?, ?, ?)",
            rusqlite::params![
                Primitive::Bool(false),
                Primitive::Timestamp(-5),
                Primitive::Blob(Vec::new()),
                Primitive::Text(String::new()),
            ],
        )
        .unwrap();

        let row: (Primitive, Primitive, Primitive, Primitive) = conn
            .query_row("SELECT b, ts, x, s FROM t", [], |row| {
                Ok((
                    Primitive::from_sql(row.get_ref(0)?, ColumnKind::Bool).unwrap(),
                    Primitive::from_sql(row.get_ref(1)?, ColumnKind::Timestamp).unwrap(),
                    Primitive::from_sql(row.get_ref(2)?, ColumnKind::Blob).unwrap(),
                    Primitive::from_sql(row.get_ref(3)?, ColumnKind::Text).unwrap(),
                ))
            })
            .unwrap();

        assert_eq!(row.0, Primitive::Bool(false));
        assert_eq!(row.1, Primitive::Timestamp(-5));
        assert_eq!(row.2, Primitive::Blob(Vec::new()));
        assert_eq!(row.3, Primitive::Text(String::new()));
    }
}
