//! Per-episode watch progress

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::blob_codec;
use crate::codec::Timestamp;
use crate::entity::{Attribute, AttributeTable, Entity};

/// Progress at which an episode counts as watched
pub const WATCHED_THRESHOLD: f64 = 0.9;

/// One place an episode can be streamed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLink {
    pub provider: String,
    pub url: String,
    /// Vertical resolution, when the provider reports it
    pub quality: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeLinks {
    pub streams: Vec<StreamLink>,
}

impl EpisodeLinks {
    /// Highest quality stream, preferring ones that report a quality
    pub fn preferred(&self) -> Option<&StreamLink> {
        self.streams.iter().max_by_key(|s| s.quality.unwrap_or(0))
    }
}

blob_codec!(EpisodeLinks, 1);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeProgress {
    pub id: String,
    pub anime_id: i64,
    pub episode: i64,
    /// Fraction of the episode watched, 0.0 to 1.0
    pub progress: f64,
    pub links: EpisodeLinks,
    pub watched: bool,
    pub updated_at: Timestamp,
}

impl EpisodeProgress {
    pub const ID: Attribute<EpisodeProgress, String> = Attribute::new(
        "id",
        |p: &EpisodeProgress| p.id.clone(),
        |p: &mut EpisodeProgress, v: String| p.id = v,
    );
    pub const ANIME_ID: Attribute<EpisodeProgress, i64> = Attribute::new(
        "anime_id",
        |p: &EpisodeProgress| p.anime_id,
        |p: &mut EpisodeProgress, v: i64| p.anime_id = v,
    );
    pub const EPISODE: Attribute<EpisodeProgress, i64> = Attribute::new(
        "episode",
        |p: &EpisodeProgress| p.episode,
        |p: &mut EpisodeProgress, v: i64| p.episode = v,
    );
    pub const PROGRESS: Attribute<EpisodeProgress, f64> = Attribute::new(
        "progress",
        |p: &EpisodeProgress| p.progress,
        |p: &mut EpisodeProgress, v: f64| p.progress = v,
    );
    pub const LINKS: Attribute<EpisodeProgress, EpisodeLinks> = Attribute::new(
        "links",
        |p: &EpisodeProgress| p.links.clone(),
        |p: &mut EpisodeProgress, v: EpisodeLinks| p.links = v,
    );
    pub const WATCHED: Attribute<EpisodeProgress, bool> = Attribute::new(
        "watched",
        |p: &EpisodeProgress| p.watched,
        |p: &mut EpisodeProgress, v: bool| p.watched = v,
    );
    pub const UPDATED_AT: Attribute<EpisodeProgress, Timestamp> = Attribute::new(
        "updated_at",
        |p: &EpisodeProgress| p.updated_at,
        |p: &mut EpisodeProgress, v: Timestamp| p.updated_at = v,
    );

    pub fn new(id: impl Into<String>, anime_id: i64, episode: i64) -> Self {
        Self {
            id: id.into(),
            anime_id,
            episode,
            updated_at: Timestamp::now(),
            ..Self::default()
        }
    }

    /// Record playback position; crossing the threshold marks the episode watched
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = progress.clamp(0.0, 1.0);
        self.watched = self.watched || self.progress >= WATCHED_THRESHOLD;
        self.updated_at = Timestamp::now();
    }
}

impl Entity for EpisodeProgress {
    type Id = String;
    const NAME: &'static str = "episode_progress";

    fn identity() -> Attribute<Self, String> {
        Self::ID
    }

    fn attributes() -> &'static AttributeTable<Self> {
        static TABLE: OnceLock<AttributeTable<EpisodeProgress>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AttributeTable::builder()
                .column(Self::ID)
                .column(Self::ANIME_ID)
                .column(Self::EPISODE)
                .column(Self::PROGRESS)
                .column(Self::LINKS)
                .column(Self::WATCHED)
                .column(Self::UPDATED_AT)
                .build()
        })
    }
}
