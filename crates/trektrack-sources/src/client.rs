//! HTTP metadata client
//!
//! [`HttpMetadataFetcher`] implements `IMetadataFetcher` over the configured
//! JSON sources. Every request goes through the per-source token bucket;
//! HTTP 429 responses are retried after `Retry-After` and shrink the bucket.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trektrack_core::{config::Config, domain::{EntityId, SourceId}, ports::IMetadataFetcher};
//! use trektrack_sources::HttpMetadataFetcher;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let fetcher = HttpMetadataFetcher::from_config(&Config::default())?;
//! let record = fetcher
//!     .enrich_entity(&EntityId::new("tng-s03e15")?, &[SourceId::new("tmdb")?])
//!     .await?;
//! println!("{:?}", record.field("title"));
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use trektrack_core::{
    config::Config,
    domain::{is_empty_value, EntityId, MetadataRecord, SourceId},
    ports::IMetadataFetcher,
};

use crate::{
    rate_limit::{parse_retry_after, AdaptiveRateLimiter, RateLimitConfig},
    SourceError,
};

/// Retry-After used when a 429 carries no usable header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Per-request timeout for sources added without configuration
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct SourceEndpoint {
    base_url: Url,
    timeout: Duration,
}

// ============================================================================
// HttpMetadataFetcher
// ============================================================================

/// Fetches episode metadata from several HTTP sources
#[derive(Debug, Clone)]
pub struct HttpMetadataFetcher {
    client: Client,
    endpoints: HashMap<SourceId, SourceEndpoint>,
    rate_limiter: Arc<AdaptiveRateLimiter>,
    default_retry_after: Duration,
}

impl Default for HttpMetadataFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpMetadataFetcher {
    /// Creates a fetcher with no sources and default rate limits
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            endpoints: HashMap::new(),
            rate_limiter: Arc::new(AdaptiveRateLimiter::new(RateLimitConfig::default())),
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Creates a fetcher for every entry of `config.sources`
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let mut fetcher = Self::new()
            .with_rate_limiter(Arc::new(AdaptiveRateLimiter::new(
                RateLimitConfig::from_sources(&config.sources),
            )));
        for (name, source) in &config.sources {
            fetcher = fetcher.with_source_timeout(
                name,
                &source.base_url,
                Duration::from_secs(source.timeout_secs),
            )?;
        }
        info!(sources = fetcher.endpoints.len(), "Metadata fetcher configured");
        Ok(fetcher)
    }

    /// Adds (or replaces) a source
    pub fn with_source(self, name: &str, base_url: &str) -> Result<Self, SourceError> {
        self.with_source_timeout(name, base_url, DEFAULT_TIMEOUT)
    }

    /// Adds (or replaces) a source with an explicit request timeout
    pub fn with_source_timeout(
        mut self,
        name: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let id = SourceId::new(name).map_err(|_| SourceError::UnknownSource(name.to_string()))?;
        let base_url = Url::parse(base_url).map_err(|e| SourceError::InvalidBaseUrl {
            source_name: name.to_string(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::InvalidBaseUrl {
                source_name: name.to_string(),
                message: "URL cannot be a base".to_string(),
            });
        }
        self.endpoints
            .insert(id, SourceEndpoint { base_url, timeout });
        Ok(self)
    }

    /// Replaces the shared rate limiter
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Overrides the wait used when a 429 has no Retry-After header
    pub fn with_default_retry_after(mut self, retry_after: Duration) -> Self {
        self.default_retry_after = retry_after;
        self
    }

    /// The shared rate limiter
    pub fn rate_limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.rate_limiter
    }

    /// True if `source` has an endpoint
    pub fn has_source(&self, source: &SourceId) -> bool {
        self.endpoints.contains_key(source)
    }

    fn endpoint(&self, source: &SourceId) -> Result<&SourceEndpoint, SourceError> {
        self.endpoints
            .get(source)
            .ok_or_else(|| SourceError::UnknownSource(source.to_string()))
    }

    fn url(
        source: &SourceId,
        endpoint: &SourceEndpoint,
        segments: &[&str],
    ) -> Result<Url, SourceError> {
        let mut url = endpoint.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SourceError::InvalidBaseUrl {
                source_name: source.to_string(),
                message: "URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Sends a GET with rate limiting and retry on HTTP 429
    ///
    /// 1. Takes a token from the source's bucket
    /// 2. Sends the request
    /// 3. On 429 shrinks the bucket, sleeps for Retry-After and retries
    /// 4. Otherwise records a success and returns the response as-is
    async fn execute_with_retry(
        &self,
        source: &SourceId,
        url: Url,
        timeout: Duration,
    ) -> Result<Response, SourceError> {
        let max_retries = self.rate_limiter.max_retries();
        let mut attempt = 0;

        loop {
            self.rate_limiter.acquire(source.as_str()).await;

            let response = self
                .client
                .get(url.clone())
                .timeout(timeout)
                .send()
                .await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                self.rate_limiter.on_success(source.as_str());
                if attempt > 0 {
                    info!(source = %source, %url, attempt, "Request succeeded after retry");
                }
                return Ok(response);
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| parse_retry_after(v, self.default_retry_after))
                .unwrap_or(self.default_retry_after);
            self.rate_limiter.on_throttle(source.as_str());

            if attempt >= max_retries {
                warn!(source = %source, %url, attempts = attempt + 1, "429 retry limit exhausted");
                return Err(SourceError::TooManyRequests {
                    source_name: source.to_string(),
                    retry_after,
                });
            }

            info!(
                source = %source,
                %url,
                attempt,
                retry_after_ms = retry_after.as_millis() as u64,
                "Received 429, backing off"
            );
            tokio::time::sleep(retry_after).await;
            attempt += 1;
        }
    }

    fn status_error(source: &SourceId, status: StatusCode) -> SourceError {
        if status.is_server_error() {
            SourceError::Unavailable {
                source_name: source.to_string(),
                status: status.as_u16(),
            }
        } else {
            SourceError::UnexpectedStatus {
                source_name: source.to_string(),
                status: status.as_u16(),
            }
        }
    }

    /// Fetches one episode from one source
    ///
    /// Returns `Ok(None)` when the source answers 404.
    pub async fn fetch_episode(
        &self,
        source: &SourceId,
        entity_id: &EntityId,
    ) -> Result<Option<Map<String, Value>>, SourceError> {
        let endpoint = self.endpoint(source)?;
        let url = Self::url(source, endpoint, &["episodes", entity_id.as_str()])?;
        let response = self.execute_with_retry(source, url, endpoint.timeout).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(source = %source, entity_id = %entity_id, "Episode not known to source");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::status_error(source, status));
        }

        let invalid = |message: String| SourceError::InvalidResponse {
            source_name: source.to_string(),
            message,
        };
        match response.json::<Value>().await {
            Ok(Value::Object(fields)) => Ok(Some(fields)),
            Ok(other) => Err(invalid(format!("expected a JSON object, got {other}"))),
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    /// Probes `GET {base_url}/health`
    pub async fn check_health(&self, source: &SourceId) -> Result<(), SourceError> {
        let endpoint = self.endpoint(source)?;
        let url = Self::url(source, endpoint, &["health"])?;
        let response = self.execute_with_retry(source, url, endpoint.timeout).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::status_error(source, status))
        }
    }

    /// Fetches from every source and combines the results
    ///
    /// The first contributing source wins each field; later sources only
    /// fill fields that are still empty.
    async fn combine(
        &self,
        entity_id: &EntityId,
        sources: &[SourceId],
    ) -> Result<MetadataRecord, SourceError> {
        let mut combined: Option<MetadataRecord> = None;
        let mut last_error = None;

        for source in sources {
            match self.fetch_episode(source, entity_id).await {
                Ok(Some(fields)) => match combined.as_mut() {
                    None => combined = Some(MetadataRecord::from_fields(source.clone(), fields)),
                    Some(record) => {
                        for (name, value) in fields {
                            if record.is_field_empty(&name) && !is_empty_value(&value) {
                                record.set_field(name, value);
                            }
                        }
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(source = %source, entity_id = %entity_id, error = %e, "Source fetch failed");
                    last_error = Some(e);
                }
            }
        }

        match combined {
            Some(record) => Ok(record.with_enriched_at(Utc::now())),
            None => Err(last_error.unwrap_or_else(|| SourceError::NotFound(entity_id.to_string()))),
        }
    }
}

// ============================================================================
// IMetadataFetcher implementation
// ============================================================================

#[async_trait::async_trait]
impl IMetadataFetcher for HttpMetadataFetcher {
    #[tracing::instrument(skip(self, entity_id), fields(entity_id = %entity_id))]
    async fn enrich_entity(
        &self,
        entity_id: &EntityId,
        sources: &[SourceId],
    ) -> anyhow::Result<MetadataRecord> {
        let record = self
            .combine(entity_id, sources)
            .await
            .with_context(|| format!("Failed to enrich {entity_id}"))?;
        debug!(
            source = ?record.source().map(|s| s.as_str()),
            fields = record.fields().len(),
            "Entity enriched"
        );
        Ok(record)
    }

    #[tracing::instrument(
        skip(self, source, entity_ids),
        fields(source = %source, batch = entity_ids.len())
    )]
    async fn prepare_batch(
        &self,
        source: &SourceId,
        entity_ids: &[EntityId],
    ) -> anyhow::Result<()> {
        self.check_health(source)
            .await
            .with_context(|| format!("Health probe for {source} failed"))?;
        debug!("Source healthy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config_registers_all_sources() {
        let fetcher = HttpMetadataFetcher::from_config(&Config::default()).unwrap();
        for name in ["tmdb", "trakt", "memory-alpha"] {
            assert!(fetcher.has_source(&SourceId::new(name).unwrap()));
        }
        assert!(!fetcher.has_source(&SourceId::manual()));
    }

    #[test]
    fn test_url_building_keeps_base_path() {
        let fetcher = HttpMetadataFetcher::new()
            .with_source("tmdb", "https://api.example.org/3/trektrack/")
            .unwrap();
        let source = SourceId::new("tmdb").unwrap();
        let endpoint = fetcher.endpoint(&source).unwrap();
        let url = HttpMetadataFetcher::url(&source, endpoint, &["episodes", "tng-s03e15"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.org/3/trektrack/episodes/tng-s03e15"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = HttpMetadataFetcher::new()
            .with_source("tmdb", "not a url")
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidBaseUrl { .. }));

        let err = HttpMetadataFetcher::new()
            .with_source("tmdb", "mailto:someone@example.org")
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidBaseUrl { .. }));
    }

    #[tokio::test]
    async fn test_unknown_source_is_an_error() {
        let fetcher = HttpMetadataFetcher::new();
        let err = fetcher
            .fetch_episode(&SourceId::new("tmdb").unwrap(), &EntityId::new("x").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::UnknownSource(_)));
    }
}
