//! Per-source rate limiting with adaptive throttling
//!
//! Every metadata source gets its own token bucket sized from
//! `sources.<name>.requests_per_minute`. A bucket holds one minute worth of
//! requests and refills continuously, so a source configured at 120 rpm can
//! burst 120 requests and then settles at two per second.
//!
//! On HTTP 429 the bucket halves its effective capacity; after every 100
//! successful requests it recovers 5% of it, up to the configured value.
//!
//! ```rust,no_run
//! use trektrack_sources::rate_limit::{AdaptiveRateLimiter, RateLimitConfig};
//!
//! # async fn example() {
//! let limiter = AdaptiveRateLimiter::new(RateLimitConfig::default());
//! limiter.acquire("tmdb").await;
//! // ... GET /episodes/{id} ...
//! limiter.on_success("tmdb");
//! # }
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;
use tracing::{debug, info, warn};
use trektrack_core::config::SourceConfig;

/// Successful requests needed before capacity recovers one step
const RECOVERY_INTERVAL: u64 = 100;

/// Fraction of the current capacity regained per recovery step
const RECOVERY_FACTOR: f64 = 0.05;

// ============================================================================
// TokenBucket
// ============================================================================

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    effective_capacity: u32,
    successes: u64,
}

impl BucketState {
    fn refill(&mut self, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens =
                (self.tokens + elapsed * refill_rate).min(f64::from(self.effective_capacity));
            self.last_refill = now;
        }
    }
}

/// Token bucket for one source
///
/// Starts full. All state sits behind a single mutex that is never held
/// across an await point.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a bucket holding `capacity` tokens, refilled at
    /// `refill_rate` tokens per second
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
                effective_capacity: capacity,
                successes: 0,
            }),
        }
    }

    /// Bucket sized for a requests-per-minute budget
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self::new(rpm, f64::from(rpm) / 60.0)
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes one token if available
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        state.refill(self.refill_rate);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token is available, zero if one already is
    pub fn time_until_available(&self) -> Duration {
        let mut state = self.lock();
        state.refill(self.refill_rate);
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate)
    }

    /// Tokens currently available
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.lock();
        state.refill(self.refill_rate);
        state.tokens
    }

    /// Configured capacity
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Capacity after throttle adjustments
    pub fn effective_capacity(&self) -> u32 {
        self.lock().effective_capacity
    }

    /// Records a successful request; every 100th success regains 5% capacity
    pub fn on_success(&self) {
        let mut state = self.lock();
        state.successes += 1;
        if state.successes % RECOVERY_INTERVAL != 0 || state.effective_capacity >= self.capacity {
            return;
        }
        let step = ((f64::from(state.effective_capacity) * RECOVERY_FACTOR) as u32).max(1);
        let recovered = (state.effective_capacity + step).min(self.capacity);
        debug!(
            old_capacity = state.effective_capacity,
            new_capacity = recovered,
            successes = state.successes,
            "Recovering bucket capacity"
        );
        state.effective_capacity = recovered;
    }

    /// Records an HTTP 429: halves the effective capacity (minimum 1) and
    /// restarts the recovery count
    pub fn on_throttle(&self) {
        let mut state = self.lock();
        let old = state.effective_capacity;
        state.effective_capacity = (old / 2).max(1);
        state.tokens = state.tokens.min(f64::from(state.effective_capacity));
        state.successes = 0;
        warn!(
            old_capacity = old,
            new_capacity = state.effective_capacity,
            "Throttled, halving bucket capacity"
        );
    }
}

// ============================================================================
// RateLimitConfig
// ============================================================================

/// Bucket parameters for the limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Capacity for sources without an override
    pub default_capacity: u32,
    /// Refill rate (tokens per second) for sources without an override
    pub default_refill_rate: f64,
    /// Per-source `(capacity, refill_rate)`
    pub source_overrides: HashMap<String, (u32, f64)>,
    /// Retries on HTTP 429 before giving up
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    /// 60 requests per minute for every source
    fn default() -> Self {
        Self {
            default_capacity: 60,
            default_refill_rate: 1.0,
            source_overrides: HashMap::new(),
            max_retries: 5,
        }
    }
}

impl RateLimitConfig {
    /// Builds overrides from the `sources` configuration section
    pub fn from_sources(sources: &BTreeMap<String, SourceConfig>) -> Self {
        let source_overrides = sources
            .iter()
            .map(|(name, source)| {
                let rpm = source.requests_per_minute.max(1);
                (name.to_lowercase(), (rpm, f64::from(rpm) / 60.0))
            })
            .collect();
        Self {
            source_overrides,
            ..Self::default()
        }
    }

    fn bucket_for(&self, source: &str) -> TokenBucket {
        let (capacity, refill_rate) = self
            .source_overrides
            .get(source)
            .copied()
            .unwrap_or((self.default_capacity, self.default_refill_rate));
        TokenBucket::new(capacity, refill_rate)
    }
}

// ============================================================================
// AdaptiveRateLimiter
// ============================================================================

/// Lazily created token buckets keyed by source name
///
/// Shared across fetch tasks via `Arc<AdaptiveRateLimiter>`.
pub struct AdaptiveRateLimiter {
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
    config: RateLimitConfig,
}

impl std::fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Retries allowed on HTTP 429
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn bucket(&self, source: &str) -> Arc<TokenBucket> {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(buckets.entry(source.to_string()).or_insert_with(|| {
            let bucket = self.config.bucket_for(source);
            debug!(
                source,
                capacity = bucket.capacity(),
                "Creating token bucket for source"
            );
            Arc::new(bucket)
        }))
    }

    fn existing(&self, source: &str) -> Option<Arc<TokenBucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(source)
            .cloned()
    }

    /// Waits until a token for `source` is available and takes it
    pub async fn acquire(&self, source: &str) {
        let bucket = self.bucket(source);
        loop {
            if bucket.try_acquire() {
                return;
            }
            let wait = bucket
                .time_until_available()
                .max(Duration::from_millis(10));
            debug!(
                source,
                wait_ms = wait.as_millis() as u64,
                "Waiting for rate limit token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Records a successful request to `source`
    pub fn on_success(&self, source: &str) {
        self.bucket(source).on_success();
    }

    /// Records an HTTP 429 from `source`
    pub fn on_throttle(&self, source: &str) {
        info!(source, "Recording throttle event");
        self.bucket(source).on_throttle();
    }

    /// Available tokens, `None` until the source has been used
    pub fn available_tokens(&self, source: &str) -> Option<f64> {
        self.existing(source).map(|b| b.available_tokens())
    }

    /// Effective capacity, `None` until the source has been used
    pub fn effective_capacity(&self, source: &str) -> Option<u32> {
        self.existing(source).map(|b| b.effective_capacity())
    }
}

// ============================================================================
// Retry-After parsing
// ============================================================================

/// Parses a `Retry-After` header: delay seconds or an HTTP-date
///
/// Dates in the past or more than an hour away fall back to `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(secs) = u64::try_from(delta.num_seconds()) {
            if secs > 0 && secs <= 3600 {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
