//! Built-in catalog domain
//!
//! The entities the application persists, and the history of how their
//! layout changed between releases.

mod anime;
mod collection;
pub mod history;
mod progress;

pub use anime::{Anime, ImageSet, ImageSize, WatchStatus};
pub use collection::{Collection, CollectionTitle};
pub use progress::{EpisodeLinks, EpisodeProgress, StreamLink, WATCHED_THRESHOLD};

use crate::entity::Entity;
use crate::error::ConfigurationError;
use crate::migration::MigrationRegistry;
use crate::schema::Schema;

/// Schema version written by this release
pub const CATALOG_VERSION: u32 = 3;

/// Every migration step from version 1 onwards
pub fn migrations() -> MigrationRegistry {
    MigrationRegistry::new(1)
        .register(Anime::NAME, 1, 2, history::anime_v1_to_v2)
        .register(Anime::NAME, 2, 3, history::anime_v2_to_v3)
        .unchanged(EpisodeProgress::NAME, 1, 2)
        .register(EpisodeProgress::NAME, 2, 3, history::progress_v2_to_v3)
        .unchanged(Collection::NAME, 2, 3)
}

/// The catalog schema, validated
pub fn schema() -> Result<Schema, ConfigurationError> {
    Schema::builder(CATALOG_VERSION)
        .entity::<Anime>()
        .entity::<EpisodeProgress>()
        .entity::<Collection>()
        .migrations(migrations())
        .build()
}
