//! Entity lock contention: queueing and automatic draining

use std::time::Duration;

use trektrack_core::domain::{OperationStatus, Priority, SyncRequest};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_second_sync_of_same_entity_is_queued_then_drained() {
    let h = immediate(ScriptedFetcher::with_latency(Duration::from_secs(1)));
    let episode = entity("tng-s05e25");

    let first = h
        .engine
        .start_sync(SyncRequest::new(vec![episode.clone()], vec![source("trakt")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.engine.locks().is_locked(&episode));

    let second = h
        .engine
        .start_sync(SyncRequest::new(vec![episode.clone()], vec![source("tmdb")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let queued = progress(&h.engine, &second.operation_id).await;
    assert_status(&queued, OperationStatus::Queued);
    assert_eq!(queued.queued_jobs(), 1);
    assert_eq!(h.engine.pending().len_for(&episode), 1);

    h.engine.settle().await;

    assert_status(
        &progress(&h.engine, &first.operation_id).await,
        OperationStatus::Completed,
    );
    let drained = progress(&h.engine, &second.operation_id).await;
    assert_status(&drained, OperationStatus::Completed);
    assert_eq!(drained.completed_jobs(), 1);
    assert_eq!(drained.queued_jobs(), 0);
    assert!(h.engine.pending().is_empty());
    assert!(h.engine.locks().is_empty());

    let calls = h.fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, source("tmdb"));
}

#[tokio::test(start_paused = true)]
async fn test_queued_jobs_drain_by_priority() {
    let h = immediate(ScriptedFetcher::with_latency(Duration::from_secs(1)));
    let episode = entity("voy-s04e08");

    h.engine
        .start_sync(SyncRequest::new(vec![episode.clone()], vec![source("trakt")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let low = h
        .engine
        .start_sync(
            SyncRequest::new(vec![episode.clone()], vec![source("tmdb")])
                .with_priority(Priority::Low),
        )
        .await
        .unwrap();
    let urgent = h
        .engine
        .start_sync(
            SyncRequest::new(vec![episode.clone()], vec![source("memory-alpha")])
                .with_priority(Priority::Urgent),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let order: Vec<_> = h
        .engine
        .pending()
        .snapshot(&episode)
        .into_iter()
        .map(|job| job.operation_id)
        .collect();
    assert_eq!(order, vec![urgent.operation_id.clone(), low.operation_id.clone()]);

    h.engine.settle().await;
    let sources: Vec<_> = h.fetcher.calls().into_iter().map(|(_, s)| s).collect();
    assert_eq!(
        sources,
        vec![source("trakt"), source("memory-alpha"), source("tmdb")]
    );
    for id in [&low.operation_id, &urgent.operation_id] {
        assert_status(&progress(&h.engine, id).await, OperationStatus::Completed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_bulk_operation_with_busy_entity_stays_bulk() {
    let h = immediate(ScriptedFetcher::with_latency(Duration::from_secs(1)));
    let ids = entities("ent", 3);

    h.engine
        .start_sync(SyncRequest::new(vec![ids[1].clone()], vec![source("trakt")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let bulk = h
        .engine
        .start_sync(SyncRequest::new(ids.clone(), vec![source("trakt")]))
        .await
        .unwrap();
    h.engine.settle().await;

    let op = progress(&h.engine, &bulk.operation_id).await;
    assert_status(&op, OperationStatus::Completed);
    assert_eq!(op.completed_jobs(), 3);
    assert_accounted(&op);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_releases_lock_and_fails_operation() {
    let fetcher = ScriptedFetcher::new();
    let ids = entities("tos", 3);
    fetcher.fail(&ids[2]);
    let h = immediate(fetcher);

    let response = h
        .engine
        .start_sync(SyncRequest::new(ids, vec![source("trakt")]))
        .await
        .unwrap();
    h.engine.settle().await;

    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Failed);
    assert_eq!(op.failed_jobs(), 1);
    assert_eq!(op.completed_jobs(), 2);
    assert!(h.engine.locks().is_empty());
    assert_eq!(h.notifier.sent()[0].title, "Metadata sync failed");
}
