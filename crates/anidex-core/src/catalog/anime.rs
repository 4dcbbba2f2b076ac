//! Anime records

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::blob_codec;
use crate::codec::{Codec, Timestamp};
use crate::entity::{Attribute, AttributeTable, Entity};
use crate::error::DecodeError;
use crate::value::{ColumnKind, Primitive};

/// Where the user is with a title
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WatchStatus {
    #[default]
    Planned,
    Watching,
    Completed,
    OnHold,
    Dropped,
}

impl WatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchStatus::Planned => "planned",
            WatchStatus::Watching => "watching",
            WatchStatus::Completed => "completed",
            WatchStatus::OnHold => "on_hold",
            WatchStatus::Dropped => "dropped",
        }
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(WatchStatus::Planned),
            "watching" => Ok(WatchStatus::Watching),
            "completed" => Ok(WatchStatus::Completed),
            "on_hold" => Ok(WatchStatus::OnHold),
            "dropped" => Ok(WatchStatus::Dropped),
            other => Err(DecodeError::InvalidValue {
                target: "watch status",
                value: other.to_string(),
            }),
        }
    }
}

/// Stored by name so reordering the variants never changes the data
impl Codec for WatchStatus {
    const KIND: ColumnKind = ColumnKind::Text;

    fn encode(&self) -> Primitive {
        Primitive::Text(self.as_str().to_string())
    }

    fn decode(primitive: Primitive) -> Result<Self, DecodeError> {
        String::decode(primitive)?.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    Small,
    Medium,
    Large,
}

/// Cover art URLs by size
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub small: Option<String>,
    pub medium: Option<String>,
    pub large: Option<String>,
}

impl ImageSet {
    pub fn url(&self, size: ImageSize) -> Option<&str> {
        match size {
            ImageSize::Small => self.small.as_deref(),
            ImageSize::Medium => self.medium.as_deref(),
            ImageSize::Large => self.large.as_deref(),
        }
    }

    /// Largest available image
    pub fn best(&self) -> Option<&str> {
        self.url(ImageSize::Large)
            .or_else(|| self.url(ImageSize::Medium))
            .or_else(|| self.url(ImageSize::Small))
    }
}

blob_codec!(ImageSet, 1);

/// A title in the user's library
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Anime {
    /// Catalog identifier from the upstream provider
    pub id: i64,
    pub title: String,
    pub status: WatchStatus,
    /// Fraction of the series watched, 0.0 to 1.0
    pub progress: f64,
    /// User score, absent until rated
    pub score: Option<f64>,
    /// Total episodes, absent while airing
    pub episode_count: Option<i64>,
    pub images: ImageSet,
    pub aired_at: Option<Timestamp>,
    pub favorite: bool,
    pub updated_at: Timestamp,
}

impl Anime {
    pub const ID: Attribute<Anime, i64> =
        Attribute::new("id", |a: &Anime| a.id, |a: &mut Anime, v: i64| a.id = v);
    pub const TITLE: Attribute<Anime, String> = Attribute::new(
        "title",
        |a: &Anime| a.title.clone(),
        |a: &mut Anime, v: String| a.title = v,
    );
    pub const STATUS: Attribute<Anime, WatchStatus> = Attribute::new(
        "status",
        |a: &Anime| a.status,
        |a: &mut Anime, v: WatchStatus| a.status = v,
    );
    pub const PROGRESS: Attribute<Anime, f64> = Attribute::new(
        "progress",
        |a: &Anime| a.progress,
        |a: &mut Anime, v: f64| a.progress = v,
    );
    pub const SCORE: Attribute<Anime, Option<f64>> = Attribute::new(
        "score",
        |a: &Anime| a.score,
        |a: &mut Anime, v: Option<f64>| a.score = v,
    );
    pub const EPISODE_COUNT: Attribute<Anime, Option<i64>> = Attribute::new(
        "episode_count",
        |a: &Anime| a.episode_count,
        |a: &mut Anime, v: Option<i64>| a.episode_count = v,
    );
    pub const IMAGES: Attribute<Anime, ImageSet> = Attribute::new(
        "images",
        |a: &Anime| a.images.clone(),
        |a: &mut Anime, v: ImageSet| a.images = v,
    );
    pub const AIRED_AT: Attribute<Anime, Option<Timestamp>> = Attribute::new(
        "aired_at",
        |a: &Anime| a.aired_at,
        |a: &mut Anime, v: Option<Timestamp>| a.aired_at = v,
    );
    pub const FAVORITE: Attribute<Anime, bool> = Attribute::new(
        "favorite",
        |a: &Anime| a.favorite,
        |a: &mut Anime, v: bool| a.favorite = v,
    );
    pub const UPDATED_AT: Attribute<Anime, Timestamp> = Attribute::new(
        "updated_at",
        |a: &Anime| a.updated_at,
        |a: &mut Anime, v: Timestamp| a.updated_at = v,
    );

    /// Create a planned title with the given catalog id
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            updated_at: Timestamp::now(),
            ..Self::default()
        }
    }

    /// Update the status
    pub fn set_status(&mut self, status: WatchStatus) {
        self.status = status;
        self.updated_at = Timestamp::now();
    }

    /// Update watch progress, clamped to 0.0..=1.0
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, 1.0);
        self.updated_at = Timestamp::now();
    }
}

impl Entity for Anime {
    type Id = i64;
    const NAME: &'static str = "anime";

    fn identity() -> Attribute<Self, i64> {
        Self::ID
    }

    fn attributes() -> &'static AttributeTable<Self> {
        static TABLE: OnceLock<AttributeTable<Anime>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AttributeTable::builder()
                .column(Self::ID)
                .column(Self::TITLE)
                .column(Self::STATUS)
                .column(Self::PROGRESS)
                .column(Self::SCORE)
                .column(Self::EPISODE_COUNT)
                .column(Self::IMAGES)
                .column(Self::AIRED_AT)
                .column(Self::FAVORITE)
                .column(Self::UPDATED_AT)
                .build()
        })
    }
}
