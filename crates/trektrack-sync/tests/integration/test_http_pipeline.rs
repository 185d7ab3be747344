//! Engine wired to the HTTP fetcher against mock metadata sources

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trektrack_cache::{InMemoryStore, MetadataCache};
use trektrack_core::domain::{FallbackStrategy, OperationStatus, SyncRequest};
use trektrack_sources::HttpMetadataFetcher;
use trektrack_sync::SyncEngine;

use crate::common::*;

#[tokio::test]
async fn test_records_fetched_over_http_are_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/episodes/tng-s06e10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "title": "Chain of Command, Part I",
            "season": 6,
            "episode": 10
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/episodes/tng-s06e11"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = HttpMetadataFetcher::new()
        .with_source("trakt", &server.uri())
        .unwrap();
    let store = Arc::new(InMemoryStore::new());
    let engine = SyncEngine::builder(Arc::new(fetcher), store.clone())
        .config(&test_config(Some(FallbackStrategy::Immediate)))
        .build()
        .unwrap();

    let response = engine
        .start_sync(SyncRequest::new(
            vec![entity("tng-s06e10"), entity("tng-s06e11")],
            vec![source("trakt")],
        ))
        .await
        .unwrap();
    engine.settle().await;

    let op = engine.get_progress(Some(&response.operation_id)).await.unwrap();
    assert_status(&op, OperationStatus::Failed);
    assert_eq!(op.completed_jobs(), 1);
    assert_eq!(op.failed_jobs(), 1);

    let cache = MetadataCache::new(store);
    let record = cache.get_record(&entity("tng-s06e10")).await.unwrap().unwrap();
    assert_eq!(record.field("title"), Some(&json!("Chain of Command, Part I")));
    assert_eq!(record.source(), Some(&source("trakt")));
    assert!(cache.get_record(&entity("tng-s06e11")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_health_probe_fails_sub_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = HttpMetadataFetcher::new()
        .with_source("trakt", &server.uri())
        .unwrap();
    let engine = SyncEngine::builder(Arc::new(fetcher), Arc::new(InMemoryStore::new()))
        .config(&test_config(Some(FallbackStrategy::Immediate)))
        .build()
        .unwrap();

    let response = engine
        .start_sync(SyncRequest::new(entities("ds9", 3), vec![source("trakt")]))
        .await
        .unwrap();
    engine.settle().await;

    let op = engine.get_progress(Some(&response.operation_id)).await.unwrap();
    assert_status(&op, OperationStatus::Failed);
    assert_eq!(op.failed_jobs(), 3);
    assert!(engine.locks().is_empty());
}
