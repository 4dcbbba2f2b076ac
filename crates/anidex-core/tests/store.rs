//! Store facade integration tests.
//!
//! Drives an in-memory catalog store through the async API: writes, typed
//! queries, sorting and live observations.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use anidex_core::catalog::{self, Anime, Collection, CollectionTitle, EpisodeProgress, WatchStatus};
use anidex_core::{SortDescriptor, Store, StoreError, WriteOutcome};
use common::{anime, has_pending, init_tracing, next_emission, watching};
use futures_util::StreamExt;

async fn open_store() -> Store {
    init_tracing();
    Store::open_in_memory(catalog::schema().unwrap())
        .await
        .unwrap()
}

/// Empty store, insert, typed fetch, attribute update, live re-emission.
#[tokio::test]
async fn test_insert_fetch_update_observe() {
    let store = open_store().await;

    let all: Vec<Anime> = store.fetch(None, None).await.unwrap();
    assert!(all.is_empty(), "fresh store should be empty");

    store.insert(anime(7, "X", 0.2)).await.unwrap();

    let found = store.fetch(Some(Anime::ID.eq(7)), None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "X");
    assert_eq!(found[0].progress, 0.2);

    let mut live = store.observe(Some(Anime::ID.eq(7)), None).await.unwrap();
    let initial = next_emission(&mut live).await.unwrap();
    assert_eq!(initial, found);

    let outcome = store.update(7, Anime::PROGRESS, 0.9).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Applied);

    let updated = next_emission(&mut live).await.unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].progress, 0.9);
    assert_eq!(updated[0].title, "X");
}

#[tokio::test]
async fn test_insert_with_same_identity_replaces() {
    let store = open_store().await;

    store.insert(anime(3, "First", 0.1)).await.unwrap();
    store.insert(anime(3, "Second", 0.5)).await.unwrap();

    let all: Vec<Anime> = store.fetch(None, None).await.unwrap();
    assert_eq!(all.len(), 1, "upsert must not duplicate the record");
    assert_eq!(all[0].title, "Second");
    assert_eq!(all[0].progress, 0.5);
}

#[tokio::test]
async fn test_update_missing_identity_is_not_found() {
    let store = open_store().await;

    let outcome = store.update(404, Anime::TITLE, "Nobody".to_string()).await.unwrap();
    assert_eq!(outcome, WriteOutcome::NotFound);
    assert_eq!(store.count::<Anime>(None).await.unwrap(), 0);

    let deleted = store.delete_by_id::<Anime>(404).await.unwrap();
    assert_eq!(deleted, WriteOutcome::NotFound);
}

#[tokio::test]
async fn test_predicates_over_optional_and_enum_columns() {
    let store = open_store().await;

    store.insert(watching(1, "Mononoke", Some(8.5))).await.unwrap();
    store.insert(watching(2, "Kaiba", None)).await.unwrap();
    store.insert(anime(3, "Haibane Renmei", 0.0)).await.unwrap();

    let scored = store
        .fetch(Some(Anime::SCORE.gt(Some(8.0))), None)
        .await
        .unwrap();
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0].id, 1);

    // an absent score fails the comparison, so the negation keeps it
    let low = store
        .fetch(Some(!Anime::SCORE.gt(Some(8.0))), None)
        .await
        .unwrap();
    assert_eq!(low.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2, 3]);

    let unscored = store.count(Some(Anime::SCORE.is_absent())).await.unwrap();
    assert_eq!(unscored, 2);

    let active = store
        .count(Some(
            Anime::STATUS.eq(WatchStatus::Watching) & Anime::SCORE.is_present(),
        ))
        .await
        .unwrap();
    assert_eq!(active, 1);
}

/// Ties under the requested order fall back to insertion order.
#[tokio::test]
async fn test_sort_is_stable() {
    let store = open_store().await;

    store.insert(watching(10, "C", Some(7.0))).await.unwrap();
    store.insert(watching(11, "A", Some(9.0))).await.unwrap();
    store.insert(watching(12, "B", Some(7.0))).await.unwrap();
    store.insert(watching(13, "D", Some(7.0))).await.unwrap();
    // replacing a record keeps its place
    store.insert(watching(10, "C2", Some(7.0))).await.unwrap();

    let sorted: Vec<Anime> = store
        .fetch(None, Some(Anime::SCORE.descending().into()))
        .await
        .unwrap();
    let ids: Vec<i64> = sorted.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![11, 10, 12, 13]);

    let by_title = store
        .fetch(
            Some(Anime::SCORE.eq(Some(7.0))),
            Some(SortDescriptor::by(Anime::TITLE.ascending())),
        )
        .await
        .unwrap();
    let titles: Vec<&str> = by_title.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["B", "C2", "D"]);
}

/// Writes to other entities never re-emit; matching writes re-emit once.
#[tokio::test]
async fn test_observation_liveness() {
    let store = open_store().await;

    let mut live = store
        .observe(Some(Anime::STATUS.eq(WatchStatus::Watching)), None)
        .await
        .unwrap();
    assert!(next_emission(&mut live).await.unwrap().is_empty());

    store
        .insert(EpisodeProgress::new("kaiba-01", 2, 1))
        .await
        .unwrap();
    // the reply is sent after every refresh for that write has run
    store.count::<Anime>(None).await.unwrap();
    assert!(!has_pending(&mut live), "unrelated entity must not re-emit");

    store.insert(watching(2, "Kaiba", None)).await.unwrap();
    let emitted = next_emission(&mut live).await.unwrap();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].title, "Kaiba");

    store.count::<Anime>(None).await.unwrap();
    assert!(!has_pending(&mut live), "one write should emit exactly once");
}

#[tokio::test]
async fn test_batch_write_emits_once() {
    let store = open_store().await;
    let mut changes = store.changes();

    let mut live = store.observe::<Anime>(None, None).await.unwrap();
    next_emission(&mut live).await.unwrap();

    store
        .write(|txn| {
            txn.insert(&anime(1, "Mushishi", 0.0))?;
            txn.insert(&anime(2, "Frieren", 0.0))?;
            txn.update(&1, Anime::FAVORITE, true)?;
            txn.insert(&Collection::new(CollectionTitle::Favorites))?;
            Ok(())
        })
        .await
        .unwrap();

    let emitted = next_emission(&mut live).await.unwrap();
    assert_eq!(emitted.len(), 2);
    assert!(emitted[0].favorite);

    store.count::<Anime>(None).await.unwrap();
    assert!(!has_pending(&mut live), "batch should coalesce into one emission");

    let change = changes.recv().await.unwrap();
    assert_eq!(change.sequence, 1);
    assert_eq!(change.entities, vec!["anime", "collection"]);
    assert_eq!(change.writes, 4);
}

/// A failed batch rolls back and notifies nobody.
#[tokio::test]
async fn test_failed_batch_is_invisible() {
    let store = open_store().await;

    let mut live = store.observe::<Anime>(None, None).await.unwrap();
    next_emission(&mut live).await.unwrap();

    let result = store
        .write(|txn| {
            txn.insert(&anime(1, "Mushishi", 0.0))?;
            txn.update(&1, Anime::ID, 2)?;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(StoreError::ImmutableIdentity { .. })));

    assert_eq!(store.count::<Anime>(None).await.unwrap(), 0);
    assert!(!has_pending(&mut live));
}

#[tokio::test]
async fn test_cancelled_observation_ends() {
    let store = open_store().await;

    let mut live = store.observe::<Anime>(None, None).await.unwrap();
    next_emission(&mut live).await.unwrap();

    live.cancel();
    store.insert(anime(1, "Mushishi", 0.0)).await.unwrap();

    assert!(live.next().await.is_none(), "cancelled stream should end");
}

/// A refresh queued before the cancel is discarded with the stream.
#[tokio::test]
async fn test_cancel_discards_queued_emission() {
    let store = open_store().await;

    let mut live = store.observe::<Anime>(None, None).await.unwrap();
    next_emission(&mut live).await.unwrap();

    store.insert(anime(1, "Mushishi", 0.0)).await.unwrap();
    live.cancel();

    assert!(live.next().await.is_none(), "cancelled stream should end");
}

/// A collection too large to read back is never written.
#[tokio::test]
async fn test_oversized_collection_is_refused() {
    let store = open_store().await;

    let mut collection = Collection::new(CollectionTitle::Favorites);
    collection.anime_ids = (0..4_000_000).collect();
    let err = store.insert(collection).await.unwrap_err();
    assert!(
        matches!(&err, StoreError::ValueTooLarge { column, .. } if column == "anime_ids"),
        "unexpected error: {err}"
    );

    let stored: Vec<Collection> = store.fetch(None, None).await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_observers_are_independent() {
    let store = open_store().await;

    let mut first = store.observe(Some(Anime::ID.eq(1)), None).await.unwrap();
    let mut second = store.observe(Some(Anime::ID.eq(2)), None).await.unwrap();
    next_emission(&mut first).await.unwrap();
    next_emission(&mut second).await.unwrap();

    drop(first);
    store.insert(anime(2, "Frieren", 0.4)).await.unwrap();

    let emitted = next_emission(&mut second).await.unwrap();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].progress, 0.4);
}
