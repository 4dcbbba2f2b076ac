//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use anidex_core::catalog::{
    Anime, CollectionTitle, EpisodeLinks, ImageSet, StreamLink, WatchStatus,
};
use anidex_core::schema::write_version;
use anidex_core::{Codec, Observation, StoreConfig, StoreResult};
use futures_util::{FutureExt, StreamExt};
use rusqlite::{params, Connection};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Timestamp used by fixture rows, 2023-11-14T22:13:20Z
pub const FIXTURE_MILLIS: i64 = 1_700_000_000_000;

/// Install a test log subscriber (ignore error if already initialized)
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("anidex_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn config_in(dir: &TempDir) -> StoreConfig {
    StoreConfig::in_dir(dir.path())
}

pub fn anime(id: i64, title: &str, progress: f64) -> Anime {
    let mut anime = Anime::new(id, title);
    anime.progress = progress;
    anime
}

pub fn watching(id: i64, title: &str, score: Option<f64>) -> Anime {
    let mut anime = Anime::new(id, title);
    anime.status = WatchStatus::Watching;
    anime.score = score;
    anime
}

pub fn images() -> ImageSet {
    ImageSet {
        small: Some("https://img.example/mushishi-s.jpg".to_string()),
        medium: None,
        large: Some("https://img.example/mushishi-l.jpg".to_string()),
    }
}

pub fn links() -> EpisodeLinks {
    EpisodeLinks {
        streams: vec![StreamLink {
            provider: "archive".to_string(),
            url: "https://stream.example/frieren/1".to_string(),
            quality: Some(1080),
        }],
    }
}

/// Next emission, failing the test if none arrives
pub async fn next_emission<E>(observation: &mut Observation<E>) -> StoreResult<Vec<E>> {
    tokio::time::timeout(Duration::from_secs(5), observation.next())
        .await
        .expect("timed out waiting for an emission")
        .expect("observation ended")
}

/// Whether an emission is already waiting
pub fn has_pending<E>(observation: &mut Observation<E>) -> bool {
    matches!(observation.next().now_or_never(), Some(Some(_)))
}

/// Store file as written by schema version 1
pub fn write_v1_fixture(path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE anime (
            id INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            episode_count INTEGER,
            images BLOB NOT NULL,
            favorite INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    )?;
    insert_v1_v2_anime(&conn)?;
    create_v1_v2_progress(&conn)?;
    write_version(&conn, 1)
}

/// Store file as written by schema version 2
pub fn write_v2_fixture(path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE anime (
            id INTEGER NOT NULL UNIQUE,
            title TEXT NOT NULL,
            status TEXT NOT NULL,
            episode_count INTEGER,
            images BLOB NOT NULL,
            favorite INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE collection (
            id TEXT NOT NULL UNIQUE,
            title BLOB NOT NULL,
            anime_ids BLOB NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )?;
    insert_v1_v2_anime(&conn)?;
    create_v1_v2_progress(&conn)?;

    conn.execute(
        "INSERT INTO collection VALUES (?, ?, ?, ?)",
        params![
            "6f1c2b1e-9a54-4a57-8f0e-3d2f7f7c1a10",
            CollectionTitle::Favorites.encode(),
            vec![2i64, 1].encode(),
            FIXTURE_MILLIS
        ],
    )?;
    write_version(&conn, 2)
}

fn insert_v1_v2_anime(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO anime VALUES (1, 'Mushishi', 'completed', 26, ?, 1, ?)",
        params![images().encode(), FIXTURE_MILLIS],
    )?;
    conn.execute(
        "INSERT INTO anime VALUES (2, 'Frieren', 'watching', NULL, ?, 0, ?)",
        params![ImageSet::default().encode(), FIXTURE_MILLIS + 1_000],
    )?;
    Ok(())
}

fn create_v1_v2_progress(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE episode_progress (
            id TEXT NOT NULL UNIQUE,
            anime_id INTEGER NOT NULL,
            episode INTEGER NOT NULL,
            position_seconds INTEGER NOT NULL,
            duration_seconds INTEGER NOT NULL,
            links BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    )?;
    let rows: [(&str, i64, i64, i64, i64); 3] = [
        ("frieren-01", 2, 1, 1440, 1440),
        ("frieren-02", 2, 2, 720, 1440),
        ("mushishi-01", 1, 1, 90, 0),
    ];
    for (id, anime_id, episode, position, duration) in rows {
        conn.execute(
            "INSERT INTO episode_progress VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                anime_id,
                episode,
                position,
                duration,
                links().encode(),
                FIXTURE_MILLIS
            ],
        )?;
    }
    Ok(())
}
