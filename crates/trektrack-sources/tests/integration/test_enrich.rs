//! Fetching and combining episode metadata

use serde_json::json;
use wiremock::MockServer;

use trektrack_core::ports::IMetadataFetcher;
use trektrack_sources::SourceError;

use crate::common::{entity, fetcher_for, mount_episode, mount_episode_status, source};

#[tokio::test]
async fn test_single_source_record() {
    let tmdb = MockServer::start().await;
    mount_episode(
        &tmdb,
        "tng-s03e15",
        json!({"title": "Yesterday's Enterprise", "season": 3, "_source": "spoofed"}),
    )
    .await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb)]);
    let record = fetcher
        .enrich_entity(&entity("tng-s03e15"), &[source("tmdb")])
        .await
        .unwrap();

    assert_eq!(record.field("title"), Some(&json!("Yesterday's Enterprise")));
    assert_eq!(record.field("season"), Some(&json!(3)));
    assert_eq!(record.source(), Some(&source("tmdb")));
    assert!(record.field("_source").is_none());
    assert!(record.enriched_at().is_some());
}

#[tokio::test]
async fn test_first_source_takes_precedence_and_later_fill_gaps() {
    let tmdb = MockServer::start().await;
    let trakt = MockServer::start().await;
    mount_episode(
        &tmdb,
        "ds9-s05e06",
        json!({"title": "Trials and Tribble-ations", "director": null, "rating": 9.1}),
    )
    .await;
    mount_episode(
        &trakt,
        "ds9-s05e06",
        json!({"title": "Trials & Tribbleations", "director": "Jonathan West", "runtime": 45}),
    )
    .await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb), ("trakt", &trakt)]);
    let record = fetcher
        .enrich_entity(&entity("ds9-s05e06"), &[source("tmdb"), source("trakt")])
        .await
        .unwrap();

    assert_eq!(record.field("title"), Some(&json!("Trials and Tribble-ations")));
    assert_eq!(record.field("director"), Some(&json!("Jonathan West")));
    assert_eq!(record.field("runtime"), Some(&json!(45)));
    assert_eq!(record.field("rating"), Some(&json!(9.1)));
    assert_eq!(record.source(), Some(&source("tmdb")));
}

#[tokio::test]
async fn test_source_is_first_contributor_when_earlier_source_misses() {
    let tmdb = MockServer::start().await;
    let trakt = MockServer::start().await;
    mount_episode_status(&tmdb, "voy-s04e08", 404).await;
    mount_episode(&trakt, "voy-s04e08", json!({"title": "Year of Hell"})).await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb), ("trakt", &trakt)]);
    let record = fetcher
        .enrich_entity(&entity("voy-s04e08"), &[source("tmdb"), source("trakt")])
        .await
        .unwrap();

    assert_eq!(record.source(), Some(&source("trakt")));
    assert_eq!(record.field("title"), Some(&json!("Year of Hell")));
}

#[tokio::test]
async fn test_not_found_everywhere_fails() {
    let tmdb = MockServer::start().await;
    let trakt = MockServer::start().await;
    mount_episode_status(&tmdb, "tos-s04e01", 404).await;
    mount_episode_status(&trakt, "tos-s04e01", 404).await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb), ("trakt", &trakt)]);
    let err = fetcher
        .enrich_entity(&entity("tos-s04e01"), &[source("tmdb"), source("trakt")])
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_server_error_is_an_outage() {
    let tmdb = MockServer::start().await;
    mount_episode_status(&tmdb, "ent-s01e01", 503).await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb)]);
    let err = fetcher
        .fetch_episode(&source("tmdb"), &entity("ent-s01e01"))
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Unavailable { status: 503, .. }));
}

#[tokio::test]
async fn test_outage_in_one_source_does_not_hide_another() {
    let tmdb = MockServer::start().await;
    let trakt = MockServer::start().await;
    mount_episode_status(&tmdb, "dis-s01e01", 500).await;
    mount_episode(&trakt, "dis-s01e01", json!({"title": "The Vulcan Hello"})).await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb), ("trakt", &trakt)]);
    let record = fetcher
        .enrich_entity(&entity("dis-s01e01"), &[source("tmdb"), source("trakt")])
        .await
        .unwrap();
    assert_eq!(record.source(), Some(&source("trakt")));
}

#[tokio::test]
async fn test_non_object_body_is_invalid() {
    let tmdb = MockServer::start().await;
    mount_episode(&tmdb, "snw-s01e01", json!(["not", "an", "object"])).await;

    let fetcher = fetcher_for(&[("tmdb", &tmdb)]);
    let err = fetcher
        .fetch_episode(&source("tmdb"), &entity("snw-s01e01"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_unconfigured_source_fails() {
    let tmdb = MockServer::start().await;
    let fetcher = fetcher_for(&[("tmdb", &tmdb)]);

    let err = fetcher
        .enrich_entity(&entity("tng-s01e01"), &[source("memory-alpha")])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SourceError>(),
        Some(SourceError::UnknownSource(_))
    ));
}
