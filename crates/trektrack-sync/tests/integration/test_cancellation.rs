//! Cooperative cancellation at sub-batch boundaries

use std::time::Duration;

use trektrack_core::domain::{FallbackStrategy, OperationStatus, SyncRequest};
use trektrack_sync::SyncEvent;

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run_accounts_every_job() {
    let h = immediate(ScriptedFetcher::new());
    let ids = entities("tos", 10);
    let mut events = h.engine.subscribe();

    // tmdb runs 5 sub-batches of 2 with 1 s pauses between them.
    let response = h
        .engine
        .start_sync(SyncRequest::new(ids, vec![source("tmdb")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(h.engine.cancel_sync(&response.operation_id).await);
    let eager = progress(&h.engine, &response.operation_id).await;
    assert_status(&eager, OperationStatus::Cancelled);

    h.engine.settle().await;
    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Cancelled);
    assert_eq!(op.completed_jobs(), 4);
    assert_eq!(op.cancelled_jobs(), 6);
    assert_accounted(&op);
    assert_eq!(h.fetcher.calls().len(), 4);
    assert!(h.engine.locks().is_empty());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1, "one notification per operation");
    assert_eq!(sent[0].title, "Metadata sync cancelled");
    assert_eq!(sent[0].body, "4 completed, 0 failed, 6 cancelled");

    let warmed = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, SyncEvent::BatchWarmingComplete { .. }))
        .count();
    assert_eq!(warmed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_operation_outlives_retention_while_sub_batch_runs() {
    let mut config = test_config(Some(FallbackStrategy::Immediate));
    config.sync.retention_secs = 5;
    let h = harness(
        ScriptedFetcher::with_latency(Duration::from_secs(10)),
        None,
        &config,
    );
    let ids = entities("ent", 4);

    let response = h
        .engine
        .start_sync(SyncRequest::new(ids.clone(), vec![source("tmdb")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.engine.cancel_sync(&response.operation_id).await);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.engine.sweep_retention().is_empty());

    h.engine.settle().await;
    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Cancelled);
    assert_eq!(op.completed_jobs(), 2);
    assert_eq!(op.cancelled_jobs(), 2);
    assert_accounted(&op);
    assert!(h.engine.locks().is_empty());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "2 completed, 0 failed, 2 cancelled");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.engine.sweep_retention(), vec![response.operation_id.clone()]);
    let persisted = progress(&h.engine, &response.operation_id).await;
    assert_eq!(persisted.cancelled_jobs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_finished_operation_is_refused() {
    let h = immediate(ScriptedFetcher::new());
    let response = h
        .engine
        .start_sync(SyncRequest::new(entities("ds9", 2), vec![source("trakt")]))
        .await
        .unwrap();
    h.engine.settle().await;

    assert!(!h.engine.cancel_sync(&response.operation_id).await);
    assert!(!h.engine.cancel_sync(&"op-unknown".parse().unwrap()).await);
    assert_status(
        &progress(&h.engine, &response.operation_id).await,
        OperationStatus::Completed,
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_paced_operation() {
    let h = immediate(ScriptedFetcher::new());
    let response = h
        .engine
        .start_sync(SyncRequest::new(entities("voy", 6), vec![source("tmdb")]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    h.engine.shutdown().await;
    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Cancelled);
    assert_eq!(op.completed_jobs(), 2);
    assert_accounted(&op);
}
