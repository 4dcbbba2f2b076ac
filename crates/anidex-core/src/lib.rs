//! anidex Core Library
//!
//! Typed persistence for the anidex media catalog: domain records are
//! stored in a local SQLite file through statically declared attribute
//! tables, queried with typed predicates and observed as live streams.
//!
//! # Architecture
//!
//! - **Codecs** turn domain values into a small set of storage primitives
//! - **Attributes** are typed, named pointers from a field to a column
//! - **Predicates** and **sort descriptors** compile to SQL over attributes
//! - **Migrations** rewrite older stores on open, inside one transaction
//! - **Observations** re-run queries after every relevant commit
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open(StoreConfig::default(), catalog::schema()?).await?;
//!
//! store.insert(Anime::new(7, "Mushishi")).await?;
//! store.update(7, Anime::PROGRESS, 0.9).await?;
//!
//! let watching = store
//!     .fetch(Some(Anime::STATUS.eq(WatchStatus::Watching)), Some(Anime::TITLE.ascending().into()))
//!     .await?;
//! let mut live = store.observe(Some(Anime::ID.eq(7)), None).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: async facade and writer thread (main entry point)
//! - `engine`: synchronous single-connection engine
//! - `catalog`: built-in entities and their migration history
//! - `migration`: policy registry and migration engine
//! - `config`: store configuration

pub mod blob;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod migration;
pub mod observe;
pub mod predicate;
pub mod schema;
pub mod sort;
pub mod store;
pub mod value;

pub use codec::{Codec, Timestamp};
pub use config::{StoreConfig, VerifyMode};
pub use engine::{Engine, WriteOutcome, WriteTxn};
pub use entity::{Attribute, AttributeTable, Entity, Record};
pub use error::{
    ConfigurationError, DecodeError, MigrationError, PolicyError, StoreError, StoreResult,
};
pub use migration::{MigrationPhase, MigrationPolicy, MigrationRegistry, MigrationReport};
pub use observe::{ChangeSet, Observation, ObserverId};
pub use predicate::{NativeFilter, Predicate};
pub use schema::{EntitySchema, Schema};
pub use sort::{Direction, SortDescriptor, SortKey};
pub use store::Store;
pub use value::{ColumnKind, Primitive};
