//! Store error handling
//!
//! Typed errors for every layer of the store. Decode errors are local to a
//! row and recoverable; configuration and migration errors are fatal and
//! surface while the store is opening.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::value::ColumnKind;

/// A stored value could not be turned back into its domain type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The primitive has the wrong storage class for the codec
    #[error("expected a {expected} value but found {found}")]
    TypeMismatch {
        expected: ColumnKind,
        found: &'static str,
    },

    /// Blob carries a format tag this build does not understand
    #[error("unsupported blob format tag {found} (this build reads format {expected})")]
    UnsupportedFormat { found: u8, expected: u8 },

    /// Bytes are truncated, mis-framed or otherwise unreadable
    #[error("malformed stored value: {0}")]
    Malformed(String),

    /// Integer does not fit the target type
    #[error("value {value} is out of range for {target}")]
    OutOfRange { target: &'static str, value: i64 },

    /// Well-formed primitive that is not a valid value of the target type
    #[error("invalid value '{value}' for {target}")]
    InvalidValue { target: &'static str, value: String },

    /// Row has no column with this name
    #[error("missing column '{0}'")]
    MissingColumn(String),

    /// Row has a column the entity does not declare
    #[error("unexpected column '{0}'")]
    UnexpectedColumn(String),

    /// Error while decoding a specific column
    #[error("column '{column}': {source}")]
    Column {
        column: String,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Attach the column name to a decode error
    pub fn in_column(self, column: &str) -> Self {
        DecodeError::Column {
            column: column.to_string(),
            source: Box::new(self),
        }
    }
}

/// Static schema or registry definition is invalid
///
/// Raised while building the schema at startup, never at query time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("entity '{entity}' declares attribute '{name}' more than once")]
    DuplicateAttribute { entity: String, name: String },

    #[error("entity '{entity}' has no column for its identity attribute '{identity}'")]
    MissingIdentity { entity: String, identity: String },

    #[error("entity '{entity}' uses an optional identity attribute '{identity}'")]
    NullableIdentity { entity: String, identity: String },

    #[error("entity '{entity}' has an attribute with an empty name")]
    EmptyName { entity: String },

    #[error("entity '{entity}' uses reserved name '{name}'")]
    ReservedName { entity: String, name: String },

    #[error("entity '{entity}' is registered more than once")]
    DuplicateEntity { entity: String },

    #[error("entity '{entity}' is introduced in version {introduced_in}, after schema version {version}")]
    EntityFromFuture {
        entity: String,
        introduced_in: u32,
        version: u32,
    },

    #[error("schema version must be at least 1")]
    InvalidVersion,

    #[error("migration policy for '{entity}' v{from} -> v{to} is registered more than once")]
    DuplicatePolicy { entity: String, from: u32, to: u32 },

    #[error("migration policy for '{entity}' v{from} -> v{to} does not move forward within the schema")]
    InvalidPolicy { entity: String, from: u32, to: u32 },

    #[error("migration policy registered for unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    #[error("no migration path for '{entity}' from version {from}")]
    MigrationGap { entity: String, from: u32 },
}

/// Error returned by a migration policy function
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Rejected(String),
}

impl PolicyError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        PolicyError::Rejected(reason.into())
    }
}

/// Migration could not bring the store to the compiled schema version
///
/// The store is left unopened and the previous data untouched.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("store is at schema version {found}, newer than this build's version {supported}")]
    FutureVersion { found: u32, supported: u32 },

    #[error("store has entity tables but no schema version record")]
    Unversioned,

    #[error("stored schema version '{0}' is not a valid version number")]
    CorruptVersion(String),

    #[error("no migration policy for '{entity}' from version {from} towards version {target}")]
    MissingPolicy {
        entity: String,
        from: u32,
        target: u32,
    },

    #[error("migration policy for '{entity}' v{from} -> v{to} failed: {source}")]
    Policy {
        entity: String,
        from: u32,
        to: u32,
        #[source]
        source: PolicyError,
    },

    #[error("migrated '{entity}' row {row} does not decode: {source}")]
    Validation {
        entity: String,
        row: usize,
        #[source]
        source: DecodeError,
    },

    #[error("database error during migration: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Errors surfaced by the store facade
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Entity type was not registered in the schema the store was opened with
    #[error("entity '{0}' is not part of this store's schema")]
    UnknownEntity(String),

    /// Identity is a first-class field and cannot be rewritten in place
    #[error("identity attribute of '{entity}' cannot be updated; delete and insert instead")]
    ImmutableIdentity { entity: String },

    /// Attribute does not belong to the entity's registered table
    #[error("'{attribute}' is not a stored attribute of '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    /// Value would be stored but could never be read back
    #[error("value for '{entity}.{column}' is {len} bytes, above the {max} byte limit")]
    ValueTooLarge {
        entity: String,
        column: String,
        len: usize,
        max: usize,
    },

    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration file: {0:#}")]
    ConfigFile(anyhow::Error),

    #[error("Failed to start the store writer thread: {0}")]
    Spawn(#[source] io::Error),

    /// The writer thread has shut down
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => StoreError::DiskFull {
                path,
                source: error,
            },
            _ => StoreError::Io {
                path,
                source: error,
            },
        }
    }

    /// Errors the application must not continue past
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Configuration(_) | StoreError::Migration(_) | StoreError::Closed
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::DiskFull { .. } => Some("Free up disk space and try again."),
            StoreError::PermissionDenied { .. } => {
                Some("Check file and directory permissions of the data directory.")
            }
            StoreError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            StoreError::Migration(MigrationError::FutureVersion { .. }) => {
                Some("The library was written by a newer version of the application. Update the application.")
            }
            StoreError::Migration(_) => {
                Some("The previous data was left untouched. Report the problem and keep the store file.")
            }
            StoreError::Decode(_) => Some("Show the affected view as empty; the row is skipped."),
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StoreError::from_io(io_err, PathBuf::from("/test/path"));

        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        assert!(!err.is_fatal());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_disk_full_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StoreError::from_io(io_err, PathBuf::from("/full/disk"));

        assert!(matches!(err, StoreError::DiskFull { .. }));
    }

    #[test]
    fn test_migration_errors_are_fatal() {
        let err = StoreError::from(MigrationError::MissingPolicy {
            entity: "anime".to_string(),
            from: 1,
            target: 3,
        });
        assert!(err.is_fatal());
        assert!(err.to_string().contains("anime"));

        let err = StoreError::from(ConfigurationError::InvalidVersion);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decode_error_column_context() {
        let err = DecodeError::Malformed("short frame".to_string()).in_column("images");
        let msg = err.to_string();
        assert!(msg.contains("images"));
        assert!(msg.contains("short frame"));
        assert!(!StoreError::from(err).is_fatal());
    }
}
