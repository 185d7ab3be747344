//! Shared helpers for metadata source integration tests
//!
//! Each helper mounts canned responses on a wiremock server standing in for
//! one metadata source.

use std::sync::Arc;

use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trektrack_core::domain::{EntityId, SourceId};
use trektrack_sources::{AdaptiveRateLimiter, HttpMetadataFetcher, RateLimitConfig};

pub fn entity(id: &str) -> EntityId {
    EntityId::new(id).unwrap()
}

pub fn source(name: &str) -> SourceId {
    SourceId::new(name).unwrap()
}

/// Builds a fetcher with one source per `(name, server)` pair
pub fn fetcher_for(servers: &[(&str, &MockServer)]) -> HttpMetadataFetcher {
    fetcher_with_retries(servers, 5)
}

/// Same as [`fetcher_for`] with a custom 429 retry budget
pub fn fetcher_with_retries(servers: &[(&str, &MockServer)], max_retries: u32) -> HttpMetadataFetcher {
    let limiter = AdaptiveRateLimiter::new(RateLimitConfig {
        max_retries,
        ..RateLimitConfig::default()
    });
    let mut fetcher = HttpMetadataFetcher::new().with_rate_limiter(Arc::new(limiter));
    for (name, server) in servers {
        fetcher = fetcher.with_source(name, &server.uri()).unwrap();
    }
    fetcher
}

/// Mounts `GET /episodes/{id}` returning `body`
pub async fn mount_episode(server: &MockServer, id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/episodes/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mounts `GET /episodes/{id}` returning a bare status
pub async fn mount_episode_status(server: &MockServer, id: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/episodes/{id}")))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
