//! Sub-batch warm-up probe

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trektrack_core::ports::IMetadataFetcher;
use trektrack_sources::SourceError;

use crate::common::{entity, fetcher_for, source};

#[tokio::test]
async fn test_prepare_batch_probes_health_once() {
    let tmdb = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&tmdb)
        .await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb)]);
    fetcher
        .prepare_batch(&source("tmdb"), &[entity("a"), entity("b"), entity("c")])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unhealthy_source_fails_the_batch() {
    let memory_alpha = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&memory_alpha)
        .await;

    let fetcher = fetcher_for(&[("memory-alpha", &memory_alpha)]);
    let err = fetcher
        .prepare_batch(&source("memory-alpha"), &[entity("tng-s01e01")])
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::Unavailable { status: 502, .. })
    ));
}
