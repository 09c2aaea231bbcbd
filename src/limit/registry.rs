//! Named limiter registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::frequency::FrequencyAggregator;
use super::token_bucket::TokenBucket;
use crate::config::LimitkitConfig;

/// Shared limiter instances indexed by name.
///
/// Instances are created on first use from the configured definition for the
/// name, or from the configured defaults. This struct is thread-safe and can
/// be shared across threads and tasks.
///
/// Lock order is `config` before either instance map.
pub struct LimiterRegistry {
    /// Definitions used when creating or reconfiguring instances
    config: RwLock<LimitkitConfig>,
    frequencies: RwLock<HashMap<String, Arc<FrequencyAggregator>>>,
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

impl LimiterRegistry {
    /// Create a registry that only knows the built-in defaults.
    pub fn new() -> Self {
        Self::with_config(LimitkitConfig::default())
    }

    /// Create a registry from configuration.
    pub fn with_config(config: LimitkitConfig) -> Self {
        info!(
            frequency = config.frequency.len(),
            token_buckets = config.token_buckets.len(),
            "Limiter registry initialized"
        );
        Self {
            config: RwLock::new(config),
            frequencies: RwLock::new(HashMap::new()),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the frequency aggregator called `name`.
    pub fn frequency(&self, name: &str) -> Arc<FrequencyAggregator> {
        if let Some(existing) = self.frequencies.read().get(name) {
            return existing.clone();
        }

        let config = self.config.read();
        let mut frequencies = self.frequencies.write();
        frequencies
            .entry(name.to_string())
            .or_insert_with(|| {
                let definition = config.frequency_for(name);
                debug!(
                    name = %name,
                    retention = ?definition.retention,
                    "Creating frequency aggregator"
                );
                Arc::new(definition.build())
            })
            .clone()
    }

    /// Get or create the token bucket called `name`.
    pub fn bucket(&self, name: &str) -> Arc<TokenBucket> {
        if let Some(existing) = self.buckets.read().get(name) {
            return existing.clone();
        }

        let config = self.config.read();
        let mut buckets = self.buckets.write();
        buckets
            .entry(name.to_string())
            .or_insert_with(|| {
                let definition = config.token_bucket_for(name);
                debug!(
                    name = %name,
                    capacity = definition.capacity,
                    fill_rate = definition.fill_rate,
                    "Creating token bucket"
                );
                Arc::new(definition.build())
            })
            .clone()
    }

    /// Replace the configuration and push it to live instances.
    ///
    /// Existing aggregators get their retention replaced (shrinking a count
    /// window evicts at once); existing buckets get their fill rate and
    /// capacity updated with refill settled first. Token levels are kept.
    /// The configuration lock is held throughout, so an instance created
    /// concurrently is built from the new definitions.
    pub fn apply_config(&self, config: LimitkitConfig) {
        let mut current = self.config.write();
        *current = config;

        for (name, aggregator) in self.frequencies.read().iter() {
            aggregator.set_retention(current.frequency_for(name).retention.into());
        }

        for (name, bucket) in self.buckets.read().iter() {
            let definition = current.token_bucket_for(name);
            bucket.set_fill_rate(definition.fill_rate);
            bucket.set_capacity(definition.capacity);
        }

        info!("Limiter configuration applied");
    }

    /// The current configuration.
    pub fn config(&self) -> LimitkitConfig {
        self.config.read().clone()
    }

    /// Number of live limiter instances of all kinds.
    pub fn limiter_count(&self) -> usize {
        self.frequencies.read().len() + self.buckets.read().len()
    }

    /// Drop all instances.
    ///
    /// Handles held by callers stay valid but are no longer shared with the
    /// registry.
    pub fn clear(&self) {
        self.frequencies.write().clear();
        self.buckets.write().clear();
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
