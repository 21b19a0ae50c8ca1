//! Aggregation pipeline configuration.
//!
//! Loaded once at startup and shared read-only by every worker.

use crate::{
    decimal::Precision,
    gap::{GapPolicyConfig, duration_secs},
    instrument::FieldDimension,
    premium::PremiumPair,
    retry::RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Missing sub-bar handling
    pub gap: GapPolicyConfig,
    /// Decimal arithmetic limits
    pub precision: Precision,
    /// Backoff for storage writes
    pub retry: RetryPolicy,
    /// Field dimension tag stamped on rollup bars
    pub field_dimension: FieldDimension,
    /// Spot/futures pairs to derive premium indices for
    pub premium_pairs: Vec<PremiumPair>,
    /// Maximum channel buffer size between workers
    pub channel_buffer_size: usize,
    /// How long emitted windows are kept to absorb late sub-bars
    #[serde(with = "duration_secs")]
    pub late_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gap: GapPolicyConfig::default(),
            precision: Precision::default(),
            retry: RetryPolicy::default(),
            field_dimension: FieldDimension::default(),
            premium_pairs: Vec::new(),
            channel_buffer_size: 1000,
            late_retention: Duration::from_secs(15 * 60),
        }
    }
}

impl PipelineConfig {
    /// Set gap policy
    pub fn with_gap(mut self, gap: GapPolicyConfig) -> Self {
        self.gap = gap;
        self
    }

    /// Set decimal precision
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Set storage retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set field dimension tag
    pub fn with_field_dimension(mut self, field_dimension: impl Into<FieldDimension>) -> Self {
        self.field_dimension = field_dimension.into();
        self
    }

    /// Add a premium index pair
    pub fn with_premium_pair(mut self, pair: PremiumPair) -> Self {
        self.premium_pairs.push(pair);
        self
    }

    /// Set channel buffer size
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size.max(1);
        self
    }

    /// Set late data retention
    pub fn with_late_retention(mut self, retention: Duration) -> Self {
        self.late_retention = retention;
        self
    }
}
