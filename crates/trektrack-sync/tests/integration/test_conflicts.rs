//! Manual review, conflict resolution and cache clearing through the engine

use serde_json::json;

use trektrack_cache::MetadataCache;
use trektrack_conflict::ReviewChoice;
use trektrack_core::domain::{ConflictStrategy, OperationId, SyncRequest};
use trektrack_sync::{lock_table::LockKind, SyncError};

use crate::common::*;

async fn sync_once(h: &Harness, request: SyncRequest) -> OperationId {
    let response = h.engine.start_sync(request).await.unwrap();
    h.engine.settle().await;
    response.operation_id
}

#[tokio::test(start_paused = true)]
async fn test_manual_review_parks_conflict_and_keeps_record() {
    let h = immediate(ScriptedFetcher::new());
    let episode = entity("tng-s03e15");
    let cache = MetadataCache::new(h.store.clone());

    h.fetcher.set_title(&episode, "Yesterday's Enterprise");
    sync_once(&h, SyncRequest::new(vec![episode.clone()], vec![source("trakt")])).await;

    h.fetcher.set_title(&episode, "Yesterdays Enterprise");
    let second = sync_once(
        &h,
        SyncRequest::new(vec![episode.clone()], vec![source("tmdb")])
            .with_conflict_strategy(ConflictStrategy::ManualReview),
    )
    .await;

    let op = progress(&h.engine, &second).await;
    assert_eq!(op.conflicts().len(), 1);
    assert_eq!(op.conflicts()[0].fields[0].field, "title");

    let record = cache.get_record(&episode).await.unwrap().unwrap();
    assert_eq!(record.field("title"), Some(&json!("Yesterday's Enterprise")));

    let pending = h.engine.list_conflicts().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].entity_id, episode);

    assert!(h
        .engine
        .resolve_conflict(&episode, "title", ReviewChoice::TakeNew)
        .await
        .unwrap());
    let record = cache.get_record(&episode).await.unwrap().unwrap();
    assert_eq!(record.field("title"), Some(&json!("Yesterdays Enterprise")));
    assert!(h.engine.list_conflicts().await.unwrap().is_empty());

    // Already settled.
    assert!(!h
        .engine
        .resolve_conflict(&episode, "title", ReviewChoice::KeepExisting)
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_resolve_conflict_on_locked_entity_fails() {
    let h = immediate(ScriptedFetcher::new());
    let episode = entity("ds9-s05e06");
    let holder: OperationId = "op-holder".parse().unwrap();
    assert!(h.engine.locks().try_acquire(&episode, &holder, LockKind::Sync));

    let result = h
        .engine
        .resolve_conflict(&episode, "title", ReviewChoice::TakeNew)
        .await;
    assert!(matches!(result, Err(SyncError::EntityLocked(id)) if id == episode));
    assert_eq!(h.engine.locks().owner(&episode), Some(holder));
}

#[tokio::test(start_paused = true)]
async fn test_latest_wins_overwrites_on_resync() {
    let h = immediate(ScriptedFetcher::new());
    let episode = entity("voy-s02e01");
    let cache = MetadataCache::new(h.store.clone());

    h.fetcher.set_title(&episode, "The 37's");
    sync_once(&h, SyncRequest::new(vec![episode.clone()], vec![source("trakt")])).await;
    h.fetcher.set_title(&episode, "The 37s");
    let op = sync_once(&h, SyncRequest::new(vec![episode.clone()], vec![source("trakt")])).await;

    assert!(progress(&h.engine, &op).await.conflicts().is_empty());
    let record = cache.get_record(&episode).await.unwrap().unwrap();
    assert_eq!(record.field("title"), Some(&json!("The 37s")));
    assert!(record.resolved_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_clear_cache_skips_locked_entities() {
    let h = immediate(ScriptedFetcher::new());
    let ids = entities("ent", 3);
    sync_once(&h, SyncRequest::new(ids.clone(), vec![source("trakt")])).await;

    let holder: OperationId = "op-holder".parse().unwrap();
    assert!(h.engine.locks().try_acquire(&ids[0], &holder, LockKind::Sync));

    assert_eq!(h.engine.clear_cache(None).await.unwrap(), 2);
    let cache = MetadataCache::new(h.store.clone());
    assert!(cache.get_record(&ids[0]).await.unwrap().is_some());
    assert!(cache.get_record(&ids[1]).await.unwrap().is_none());

    h.engine.locks().release(&ids[0], &holder);
    assert_eq!(h.engine.clear_cache(Some(&ids[0])).await.unwrap(), 1);
    assert_eq!(h.engine.clear_cache(Some(&ids[0])).await.unwrap(), 0);
}
