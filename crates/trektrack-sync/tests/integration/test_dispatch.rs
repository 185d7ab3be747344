//! Capability-driven dispatch: deferred, immediate, polling, manual, disabled

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use trektrack_core::domain::{FallbackStrategy, OperationStatus, SyncRequest};
use trektrack_sync::{SyncError, SyncEvent};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_immediate_completes_and_notifies_once() {
    let h = immediate(ScriptedFetcher::new());
    let ids = entities("tng", 3);

    let response = h
        .engine
        .start_sync(SyncRequest::new(ids.clone(), vec![source("trakt")]))
        .await
        .unwrap();
    assert_eq!(response.capability.fallback_strategy, FallbackStrategy::Immediate);
    h.engine.settle().await;

    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Completed);
    assert_eq!(op.completed_jobs(), 3);
    assert_eq!(op.strategy(), Some(FallbackStrategy::Immediate));
    assert_accounted(&op);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].title, "Metadata sync complete");
    assert_eq!(sent[0].body, "3 completed, 0 failed");
}

#[tokio::test]
async fn test_empty_request_is_rejected() {
    let h = immediate(ScriptedFetcher::new());

    let no_entities = h
        .engine
        .start_sync(SyncRequest::new(vec![], vec![source("tmdb")]))
        .await;
    assert!(matches!(no_entities, Err(SyncError::InvalidRequest(_))));

    let no_sources = h
        .engine
        .start_sync(SyncRequest::new(vec![entity("tos-s01e01")], vec![]))
        .await;
    assert!(matches!(no_sources, Err(SyncError::InvalidRequest(_))));
    assert!(h.engine.get_progress(None).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_operation_id_is_rejected() {
    let h = immediate(ScriptedFetcher::new());
    let request = SyncRequest::new(vec![entity("ds9-s01e01")], vec![source("trakt")])
        .with_operation_id("op-fixed".parse().unwrap());

    h.engine.start_sync(request.clone()).await.unwrap();
    let again = h.engine.start_sync(request).await;
    assert!(matches!(again, Err(SyncError::InvalidRequest(_))));
}

#[tokio::test(start_paused = true)]
async fn test_available_host_defers_until_run_deferred() {
    let host = Arc::new(FakeHost::new(true, true, true));
    let h = harness(ScriptedFetcher::new(), Some(host.clone()), &test_config(None));

    let response = h
        .engine
        .start_sync(SyncRequest::new(entities("voy", 2), vec![source("trakt")]))
        .await
        .unwrap();
    assert!(response.capability.is_available);
    assert_eq!(host.registrations(), vec![response.operation_id.clone()]);

    h.engine.settle().await;
    let waiting = progress(&h.engine, &response.operation_id).await;
    assert_status(&waiting, OperationStatus::Running);
    assert!(h.fetcher.calls().is_empty());

    let done = h.engine.run_deferred(&response.operation_id).await.unwrap();
    assert_status(&done, OperationStatus::Completed);
    assert_eq!(h.fetcher.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_without_deferred_support_polls_after_interval() {
    let host = Arc::new(FakeHost::new(true, false, true));
    let config = test_config(None);
    let h = harness(ScriptedFetcher::new(), Some(host), &config);

    let started = Instant::now();
    let response = h
        .engine
        .start_sync(SyncRequest::new(vec![entity("ent-s01e01")], vec![source("trakt")]))
        .await
        .unwrap();
    assert_eq!(response.capability.fallback_strategy, FallbackStrategy::Polling);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.fetcher.calls().is_empty(), "nothing runs before the first tick");

    h.engine.settle().await;
    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Completed);
    assert_eq!(op.strategy(), Some(FallbackStrategy::Polling));
    // Single-entity operations default to high priority.
    assert!(started.elapsed() >= config.polling_interval(op.priority()));
}

#[tokio::test(start_paused = true)]
async fn test_polling_retries_unavailable_source_then_gives_up() {
    let host = Arc::new(FakeHost::new(true, false, true));
    let mut config = test_config(None);
    config.sync.polling_max_attempts = 3;
    let fetcher = ScriptedFetcher::new();
    fetcher.take_down(&source("trakt"));
    let h = harness(fetcher, Some(host), &config);

    let started = Instant::now();
    let response = h
        .engine
        .start_sync(SyncRequest::new(vec![entity("dis-s01e01")], vec![source("trakt")]))
        .await
        .unwrap();
    assert_eq!(response.capability.fallback_strategy, FallbackStrategy::Polling);

    h.engine.settle().await;
    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Failed);
    assert_eq!(op.failed_jobs(), 1);
    assert_accounted(&op);
    assert_eq!(h.fetcher.preparations().len(), 3);
    assert!(h.fetcher.calls().is_empty());
    assert!(h.engine.locks().is_empty());
    assert!(started.elapsed() >= config.polling_interval(op.priority()) * 3);

    tokio::time::sleep(config.polling_interval(op.priority()) * 10).await;
    assert_eq!(h.fetcher.preparations().len(), 3, "no timer keeps polling");
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_host_requires_manual_sync_then_runs() {
    let h = harness(ScriptedFetcher::new(), None, &test_config(None));
    let mut events = h.engine.subscribe();

    let response = h
        .engine
        .start_sync(SyncRequest::new(vec![entity("tas-s01e01")], vec![source("trakt")]))
        .await
        .unwrap();
    assert_eq!(response.capability.fallback_strategy, FallbackStrategy::Manual);
    h.engine.settle().await;

    let mut manual = 0;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::ManualSyncRequired { operation_id, .. } = event {
            assert_eq!(operation_id, response.operation_id);
            manual += 1;
        }
    }
    assert_eq!(manual, 1);
    assert_status(
        &progress(&h.engine, &response.operation_id).await,
        OperationStatus::Completed,
    );
}

#[tokio::test(start_paused = true)]
async fn test_disabled_closes_operation_without_work() {
    let h = harness(
        ScriptedFetcher::new(),
        None,
        &test_config(Some(FallbackStrategy::Disabled)),
    );

    let response = h
        .engine
        .start_sync(SyncRequest::new(entities("dis", 4), vec![source("tmdb")]))
        .await
        .unwrap();
    h.engine.settle().await;

    let op = progress(&h.engine, &response.operation_id).await;
    assert_status(&op, OperationStatus::Cancelled);
    assert_eq!(op.cancelled_jobs(), 4);
    assert_accounted(&op);
    assert!(h.fetcher.calls().is_empty());
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capability_update_broadcast_on_first_detection() {
    let h = immediate(ScriptedFetcher::new());
    let mut events = h.engine.subscribe();

    let first = h.engine.get_sync_capability().await;
    let second = h.engine.get_sync_capability().await;
    assert!(first.same_decision(&second));

    let updates = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, SyncEvent::CapabilityUpdate { .. }))
        .count();
    assert_eq!(updates, 1);
}
