//! Migration history of the catalog schema
//!
//! - v1: anime (`name`), episode_progress (position and duration in seconds)
//! - v2: anime `name` renamed to `title`; collection added
//! - v3: anime gains `progress`, `score` and `aired_at`; episode_progress
//!   stores a `progress` fraction and a `watched` flag instead of seconds

use crate::entity::Record;
use crate::error::PolicyError;
use crate::value::Primitive;

use super::progress::WATCHED_THRESHOLD;

pub fn anime_v1_to_v2(mut record: Record) -> Result<Record, PolicyError> {
    record.rename("name", "title")?;
    Ok(record)
}

pub fn anime_v2_to_v3(record: Record) -> Result<Record, PolicyError> {
    Ok(record
        .with("progress", Primitive::Real(0.0))
        .with("score", Primitive::Null)
        .with("aired_at", Primitive::Null))
}

pub fn progress_v2_to_v3(mut record: Record) -> Result<Record, PolicyError> {
    let position: i64 = record.take_as("position_seconds")?;
    let duration: i64 = record.take_as("duration_seconds")?;
    if position < 0 {
        return Err(PolicyError::rejected(format!(
            "negative playback position {position}"
        )));
    }

    let progress = if duration <= 0 {
        0.0
    } else {
        (position as f64 / duration as f64).min(1.0)
    };

    record.set("progress", Primitive::Real(progress));
    record.set("watched", Primitive::Bool(progress >= WATCHED_THRESHOLD));
    Ok(record)
}
