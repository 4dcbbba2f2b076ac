//! User collections of titles

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blob_codec;
use crate::codec::Timestamp;
use crate::entity::{Attribute, AttributeTable, Entity};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionTitle {
    /// The built-in favorites list
    #[default]
    Favorites,
    Custom(String),
}

impl fmt::Display for CollectionTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionTitle::Favorites => f.write_str("Favorites"),
            CollectionTitle::Custom(name) => f.write_str(name),
        }
    }
}

blob_codec!(CollectionTitle, 1);
blob_codec!(Vec<i64>, 1);

/// An ordered, user-curated list of titles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    pub id: Uuid,
    pub title: CollectionTitle,
    pub anime_ids: Vec<i64>,
    pub created_at: Timestamp,
}

impl Collection {
    pub const ID: Attribute<Collection, Uuid> =
        Attribute::new("id", |c: &Collection| c.id, |c: &mut Collection, v: Uuid| c.id = v);
    pub const TITLE: Attribute<Collection, CollectionTitle> = Attribute::new(
        "title",
        |c: &Collection| c.title.clone(),
        |c: &mut Collection, v: CollectionTitle| c.title = v,
    );
    pub const ANIME_IDS: Attribute<Collection, Vec<i64>> = Attribute::new(
        "anime_ids",
        |c: &Collection| c.anime_ids.clone(),
        |c: &mut Collection, v: Vec<i64>| c.anime_ids = v,
    );
    pub const CREATED_AT: Attribute<Collection, Timestamp> = Attribute::new(
        "created_at",
        |c: &Collection| c.created_at,
        |c: &mut Collection, v: Timestamp| c.created_at = v,
    );

    /// Create an empty collection with a fresh id
    pub fn new(title: CollectionTitle) -> Self {
        Self::with_id(Uuid::new_v4(), title)
    }

    /// Create a collection with a specific id
    pub fn with_id(id: Uuid, title: CollectionTitle) -> Self {
        Self {
            id,
            title,
            anime_ids: Vec::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Append a title, keeping the list free of duplicates
    pub fn add(&mut self, anime_id: i64) {
        if !self.anime_ids.contains(&anime_id) {
            self.anime_ids.push(anime_id);
        }
    }

    pub fn remove(&mut self, anime_id: i64) {
        self.anime_ids.retain(|id| *id != anime_id);
    }
}

impl Entity for Collection {
    type Id = Uuid;
    const NAME: &'static str = "collection";
    const INTRODUCED_IN: u32 = 2;

    fn identity() -> Attribute<Self, Uuid> {
        Self::ID
    }

    fn attributes() -> &'static AttributeTable<Self> {
        static TABLE: OnceLock<AttributeTable<Collection>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AttributeTable::builder()
                .column(Self::ID)
                .column(Self::TITLE)
                .column(Self::ANIME_IDS)
                .column(Self::CREATED_AT)
                .build()
        })
    }
}
