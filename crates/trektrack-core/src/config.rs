//! Configuration module for Trektrack.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{FallbackStrategy, Priority};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Trektrack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    /// Per-source settings keyed by source name.
    pub sources: BTreeMap<String, SourceConfig>,
    pub conflicts: ConflictsConfig,
    pub background: BackgroundConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Engine-wide scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds a terminal operation stays visible before eviction.
    pub retention_secs: u64,
    /// Seconds between periodic retention sweeps in the daemon.
    pub retention_sweep_interval_secs: u64,
    /// Sub-batch size for sources without their own `max_batch_size`.
    pub default_batch_size: usize,
    /// Pause between sub-batches for sources without their own delay.
    pub default_inter_batch_delay_ms: u64,
    /// Maximum polling attempts before the polling strategy gives up.
    pub polling_max_attempts: u32,
    /// Polling interval for `high` priority; other priorities scale from it.
    pub polling_base_interval_ms: u64,
}

/// Settings for one metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL; episodes are fetched from `{base_url}/episodes/{id}`.
    pub base_url: String,
    /// Maximum entities per sub-batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Pause between sub-batches; falls back to `sync.default_inter_batch_delay_ms`.
    #[serde(default)]
    pub inter_batch_delay_ms: Option<u64>,
    /// Token-bucket refill rate.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_batch_size() -> usize {
    10
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

/// Conflict resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Default strategy: `latest-wins`, `merge-with-priority` or `manual-review`.
    pub default_strategy: String,
    /// Source names from highest to lowest priority.
    pub source_priority: Vec<String>,
}

/// Deferred background-execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Administrative switch for the host's deferred execution.
    pub deferred_enabled: Option<bool>,
    /// Skip detection and always use this strategy.
    pub force_strategy: Option<FallbackStrategy>,
}

/// Durable cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub database: PathBuf,
    /// Upper bound on open connections to the database.
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/trektrack/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("trektrack")
            .join("config.yaml")
    }

    /// Sub-batch size for `source`.
    pub fn batch_size_for(&self, source: &str) -> usize {
        self.sources
            .get(source)
            .map(|s| s.max_batch_size)
            .unwrap_or(self.sync.default_batch_size)
            .max(1)
    }

    /// Inter-batch delay for `source`.
    pub fn inter_batch_delay_for(&self, source: &str) -> Duration {
        let ms = self
            .sources
            .get(source)
            .and_then(|s| s.inter_batch_delay_ms)
            .unwrap_or(self.sync.default_inter_batch_delay_ms);
        Duration::from_millis(ms)
    }

    /// Retention window for terminal operations.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.sync.retention_secs)
    }

    /// Polling interval for an operation of the given priority.
    ///
    /// With the default base of 5 s: urgent 2 s, high 5 s, normal 15 s, low 30 s.
    pub fn polling_interval(&self, priority: Priority) -> Duration {
        let base = self.sync.polling_base_interval_ms;
        let ms = match priority {
            Priority::Urgent => base * 2 / 5,
            Priority::High => base,
            Priority::Normal => base * 3,
            Priority::Low => base * 6,
        };
        Duration::from_millis(ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            sources: default_sources(),
            conflicts: ConflictsConfig::default(),
            background: BackgroundConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_sources() -> BTreeMap<String, SourceConfig> {
    let entry = |base_url: &str, max_batch_size: usize, rpm: u32| SourceConfig {
        base_url: base_url.to_string(),
        max_batch_size,
        inter_batch_delay_ms: None,
        requests_per_minute: rpm,
        timeout_secs: default_timeout_secs(),
    };
    BTreeMap::from([
        (
            "tmdb".to_string(),
            entry("https://api.themoviedb.org/3/trektrack", 20, 240),
        ),
        (
            "trakt".to_string(),
            entry("https://api.trakt.tv/trektrack", 15, 120),
        ),
        (
            "memory-alpha".to_string(),
            entry("https://memory-alpha.fandom.com/trektrack", 5, 30),
        ),
    ])
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retention_secs: 300,
            retention_sweep_interval_secs: 60,
            default_batch_size: default_max_batch_size(),
            default_inter_batch_delay_ms: 1000,
            polling_max_attempts: 5,
            polling_base_interval_ms: 5000,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_strategy: "latest-wins".to_string(),
            source_priority: ["tmdb", "trakt", "memory-alpha", "manual"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("trektrack")
                .join("trektrack.db"),
            max_connections: 4,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.retention_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

/// Valid values for `conflicts.default_strategy`.
const VALID_CONFLICT_STRATEGIES: &[&str] =
    &["latest-wins", "merge-with-priority", "manual-review"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: String, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field,
                    message: "must be greater than 0".into(),
                });
            }
        };

        // --- sync ---
        positive("sync.retention_secs".into(), self.sync.retention_secs);
        positive(
            "sync.retention_sweep_interval_secs".into(),
            self.sync.retention_sweep_interval_secs,
        );
        positive(
            "sync.default_batch_size".into(),
            self.sync.default_batch_size as u64,
        );
        positive(
            "sync.polling_max_attempts".into(),
            u64::from(self.sync.polling_max_attempts),
        );
        positive(
            "sync.polling_base_interval_ms".into(),
            self.sync.polling_base_interval_ms,
        );

        // --- storage ---
        positive(
            "storage.max_connections".into(),
            u64::from(self.storage.max_connections),
        );
        positive("storage.busy_timeout_ms".into(), self.storage.busy_timeout_ms);

        // --- sources ---
        for (name, source) in &self.sources {
            positive(
                format!("sources.{name}.max_batch_size"),
                source.max_batch_size as u64,
            );
            positive(
                format!("sources.{name}.requests_per_minute"),
                u64::from(source.requests_per_minute),
            );
            positive(format!("sources.{name}.timeout_secs"), source.timeout_secs);
        }
        for (name, source) in &self.sources {
            if url::Url::parse(&source.base_url).is_err() {
                errors.push(ValidationError {
                    field: format!("sources.{name}.base_url"),
                    message: format!("not a valid URL: {}", source.base_url),
                });
            }
        }

        // --- conflicts ---
        if !VALID_CONFLICT_STRATEGIES.contains(&self.conflicts.default_strategy.as_str()) {
            errors.push(ValidationError {
                field: "conflicts.default_strategy".into(),
                message: format!(
                    "invalid strategy '{}'; valid options: {}",
                    self.conflicts.default_strategy,
                    VALID_CONFLICT_STRATEGIES.join(", ")
                ),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for name in &self.conflicts.source_priority {
            if !seen.insert(name.to_ascii_lowercase()) {
                errors.push(ValidationError {
                    field: "conflicts.source_priority".into(),
                    message: format!("source '{name}' listed more than once"),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use trektrack_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_retention_secs(60)
///     .conflicts_default_strategy("merge-with-priority")
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_retention_secs(mut self, seconds: u64) -> Self {
        self.config.sync.retention_secs = seconds;
        self
    }

    pub fn sync_default_batch_size(mut self, size: usize) -> Self {
        self.config.sync.default_batch_size = size;
        self
    }

    pub fn sync_default_inter_batch_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.default_inter_batch_delay_ms = ms;
        self
    }

    pub fn sync_polling_max_attempts(mut self, attempts: u32) -> Self {
        self.config.sync.polling_max_attempts = attempts;
        self
    }

    pub fn sync_polling_base_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync.polling_base_interval_ms = ms;
        self
    }

    // --- sources ---

    /// Adds or replaces a source.
    pub fn source(mut self, name: impl Into<String>, source: SourceConfig) -> Self {
        self.config.sources.insert(name.into(), source);
        self
    }

    /// Removes every configured source.
    pub fn clear_sources(mut self) -> Self {
        self.config.sources.clear();
        self
    }

    // --- conflicts ---

    pub fn conflicts_default_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.conflicts.default_strategy = strategy.into();
        self
    }

    pub fn conflicts_source_priority(mut self, order: Vec<String>) -> Self {
        self.config.conflicts.source_priority = order;
        self
    }

    // --- background ---

    pub fn background_deferred_enabled(mut self, enabled: bool) -> Self {
        self.config.background.deferred_enabled = Some(enabled);
        self
    }

    pub fn background_force_strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.config.background.force_strategy = Some(strategy);
        self
    }

    // --- storage ---

    pub fn storage_database(mut self, path: PathBuf) -> Self {
        self.config.storage.database = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
