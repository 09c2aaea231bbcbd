//! Configuration management for limitkit.
//!
//! Limiters are declared by name in a YAML document. Names that are not
//! declared fall back to the `defaults` section.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimitError, Result};
use crate::limit::{FrequencyAggregator, Retention, TokenBucket};

/// Main configuration for limitkit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitkitConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Definitions used for names without an explicit entry
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Named frequency aggregators
    #[serde(default)]
    pub frequency: BTreeMap<String, FrequencyConfig>,

    /// Named token buckets
    #[serde(default)]
    pub token_buckets: BTreeMap<String, TokenBucketConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Fallback definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub frequency: FrequencyConfig,

    #[serde(default)]
    pub token_bucket: TokenBucketConfig,
}

/// Definition of a frequency aggregator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrequencyConfig {
    /// Written as a single-key map, e.g. `{ count: 128 }`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub retention: RetentionConfig,
}

impl FrequencyConfig {
    pub fn build(&self) -> FrequencyAggregator {
        FrequencyAggregator::new(self.retention.into())
    }
}

/// Retention policy as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionConfig {
    /// Keep samples at most this many milliseconds older than the newest
    TimeMs(u64),
    /// Keep at most this many samples
    Count(usize),
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig::TimeMs(4000)
    }
}

impl From<RetentionConfig> for Retention {
    fn from(retention: RetentionConfig) -> Self {
        match retention {
            RetentionConfig::TimeMs(ms) => Retention::Time(Duration::from_millis(ms)),
            RetentionConfig::Count(max) => Retention::Count(max),
        }
    }
}

/// Definition of a token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Tokens available at creation
    pub initial_tokens: f64,
    /// Upper bound for refill
    pub capacity: f64,
    /// Tokens added per second
    pub fill_rate: f64,
    /// How often waiting consumers re-check the level
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            initial_tokens: 10.0,
            capacity: 10.0,
            fill_rate: 1.0,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl TokenBucketConfig {
    pub fn build(&self) -> TokenBucket {
        TokenBucket::new(self.initial_tokens, self.capacity, self.fill_rate)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

impl LimitkitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limitkit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimitError::Config(format!("Failed to parse limitkit config: {}", e)))
    }

    /// The definition for a named frequency aggregator.
    pub fn frequency_for(&self, name: &str) -> &FrequencyConfig {
        self.frequency.get(name).unwrap_or(&self.defaults.frequency)
    }

    /// The definition for a named token bucket.
    pub fn token_bucket_for(&self, name: &str) -> &TokenBucketConfig {
        self.token_buckets
            .get(name)
            .unwrap_or(&self.defaults.token_bucket)
    }
}
