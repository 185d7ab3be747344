//! Retention of finished operations and persisted progress fallback

use std::time::Duration;

use trektrack_cache::MetadataCache;
use trektrack_core::domain::{OperationStatus, SyncRequest};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_finished_operation_evicted_but_still_readable() {
    let h = immediate(ScriptedFetcher::new());
    let response = h
        .engine
        .start_sync(SyncRequest::new(entities("tos", 2), vec![source("trakt")]))
        .await
        .unwrap();
    h.engine.settle().await;

    assert!(h.engine.sweep_retention().is_empty());
    assert_eq!(h.engine.scheduler().tracker().live_count(), 1);

    tokio::time::advance(Duration::from_secs(301)).await;
    assert_eq!(h.engine.sweep_retention(), vec![response.operation_id.clone()]);
    assert_eq!(h.engine.scheduler().tracker().live_count(), 0);

    let persisted = progress(&h.engine, &response.operation_id).await;
    assert_status(&persisted, OperationStatus::Completed);
    assert_eq!(persisted.completed_jobs(), 2);

    let cache = MetadataCache::new(h.store.clone());
    assert!(cache
        .get_progress(&response.operation_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn test_running_operations_are_never_evicted() {
    let h = immediate(ScriptedFetcher::with_latency(Duration::from_secs(600)));
    let response = h
        .engine
        .start_sync(SyncRequest::new(vec![entity("ds9-s07e25")], vec![source("trakt")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(400)).await;

    assert!(h.engine.sweep_retention().is_empty());
    let running = h.engine.get_all_progress();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id(), &response.operation_id);

    h.engine.settle().await;
    assert!(h.engine.get_all_progress().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_get_progress_without_id_returns_latest() {
    let h = immediate(ScriptedFetcher::new());
    h.engine
        .start_sync(SyncRequest::new(vec![entity("voy-s01e01")], vec![source("trakt")]))
        .await
        .unwrap();
    let latest = h
        .engine
        .start_sync(SyncRequest::new(vec![entity("voy-s01e02")], vec![source("trakt")]))
        .await
        .unwrap();
    h.engine.settle().await;

    let op = h.engine.get_progress(None).await.unwrap();
    assert_eq!(op.id(), &latest.operation_id);
}
