//! HTTP 429 handling

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trektrack_sources::SourceError;

use crate::common::{entity, fetcher_with_retries, source};

#[tokio::test]
async fn test_retries_after_429_and_shrinks_bucket() {
    let tmdb = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/episodes/tng-s06e15"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&tmdb)
        .await;
    Mock::given(method("GET"))
        .and(path("/episodes/tng-s06e15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "Tapestry"})))
        .expect(1)
        .mount(&tmdb)
        .await;

    let fetcher = fetcher_with_retries(&[("tmdb", &tmdb)], 3);
    let fields = fetcher
        .fetch_episode(&source("tmdb"), &entity("tng-s06e15"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fields["title"], json!("Tapestry"));
    assert_eq!(fetcher.rate_limiter().effective_capacity("tmdb"), Some(30));
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let trakt = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/episodes/ds9-s07e25"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(3)
        .mount(&trakt)
        .await;

    let fetcher = fetcher_with_retries(&[("trakt", &trakt)], 2);
    let err = fetcher
        .fetch_episode(&source("trakt"), &entity("ds9-s07e25"))
        .await
        .unwrap_err();

    match err {
        SourceError::TooManyRequests { source_name, retry_after } => {
            assert_eq!(source_name, "trakt");
            assert!(retry_after.is_zero());
        }
        other => panic!("expected TooManyRequests, got {other:?}"),
    }
}
