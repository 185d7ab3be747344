//! Trektrack Sources - HTTP metadata fetcher
//!
//! This crate implements the `IMetadataFetcher` port against the configured
//! JSON metadata sources (TMDB, Trakt, Memory Alpha mirrors, ...).
//!
//! ## Modules
//!
//! - [`client`] - Per-source HTTP client with retry on HTTP 429
//! - [`rate_limit`] - Per-source token buckets with adaptive throttling
//!
//! ## Wire format
//!
//! Each source exposes `GET {base_url}/episodes/{entity_id}` returning a JSON
//! object of episode fields, and `GET {base_url}/health` used as a warm-up
//! probe before each sub-batch.

pub mod client;
pub mod rate_limit;

pub use client::HttpMetadataFetcher;
pub use rate_limit::{AdaptiveRateLimiter, RateLimitConfig};

use std::time::Duration;

/// Errors that can occur when talking to a metadata source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The requested source has no configuration
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// No requested source knows the entity (HTTP 404 everywhere)
    #[error("Entity not found in any source: {0}")]
    NotFound(String),

    /// Rate limited and the retry budget is exhausted
    #[error("Too many requests to {source_name}, retry after {retry_after:?}")]
    TooManyRequests {
        source_name: String,
        retry_after: Duration,
    },

    /// Upstream outage (HTTP 5xx)
    #[error("Source {source_name} unavailable: HTTP {status}")]
    Unavailable { source_name: String, status: u16 },

    /// Unexpected non-success status
    #[error("Source {source_name} returned HTTP {status}")]
    UnexpectedStatus { source_name: String, status: u16 },

    /// Network-level error
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Body was not a JSON object
    #[error("Invalid response from {source_name}: {message}")]
    InvalidResponse {
        source_name: String,
        message: String,
    },

    /// A configured base URL cannot be parsed
    #[error("Invalid base URL for {source_name}: {message}")]
    InvalidBaseUrl {
        source_name: String,
        message: String,
    },
}
