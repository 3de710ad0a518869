//! Configuration types for extraction runs.
//!
//! # Overview
//!
//! - [`ExtractConfig`]: options for one extraction engine, resolved by the
//!   host before the engine is created
//! - [`ExtractConfigBuilder`]: validating builder for [`ExtractConfig`]
//! - [`ShopDomain`], [`AccessToken`], [`ApiVersion`]: connection values used
//!   by the default reqwest transport
//!
//! There is no global configuration and nothing is read from disk here; the
//! host decides between bulk and cursor extraction by passing a value.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use shopify_extract::ExtractConfig;
//!
//! let config = ExtractConfig::builder()
//!     .apply_concurrency(true)
//!     .max_concurrency(4)
//!     .poll_interval(Duration::from_secs(20))
//!     .build()
//!     .unwrap();
//!
//! assert!(config.apply_concurrency());
//! assert!(!config.bulk_mode());
//! ```

mod newtypes;
mod version;

pub use newtypes::{AccessToken, ShopDomain};
pub use version::ApiVersion;

use std::time::Duration;

use crate::error::ConfigError;
use crate::extract::{MissingKeyPolicy, RetryPolicy};

/// Largest `first:` argument the Admin API accepts on a connection.
pub const PROVIDER_MAX_PAGE_SIZE: u32 = 250;

/// Options recognised by an extraction engine.
///
/// `ExtractConfig` is `Clone + Send + Sync`; the concurrent fetcher hands a
/// clone to every partition worker.
#[derive(Clone, Debug)]
pub struct ExtractConfig {
    bulk_mode: bool,
    apply_concurrency: bool,
    monthly_chunking: bool,
    max_concurrency: usize,
    per_partition_budget: f64,
    queue_capacity: usize,
    sort_key: Option<String>,
    poll_interval: Duration,
    poll_timeout: Duration,
    max_page_size: u32,
    max_safe_points: f64,
    retry: RetryPolicy,
    missing_key_policy: MissingKeyPolicy,
}

impl ExtractConfig {
    /// Creates a new builder with every option at its default.
    #[must_use]
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder::new()
    }

    /// Whether extraction goes through a bulk operation.
    #[must_use]
    pub const fn bulk_mode(&self) -> bool {
        self.bulk_mode
    }

    /// Whether the window is split across concurrent partitions.
    #[must_use]
    pub const fn apply_concurrency(&self) -> bool {
        self.apply_concurrency
    }

    /// Whether each partition walks its window one calendar month at a time.
    #[must_use]
    pub const fn monthly_chunking(&self) -> bool {
        self.monthly_chunking
    }

    /// Upper bound on the number of partitions.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Budget points one partition needs to itself.
    #[must_use]
    pub const fn per_partition_budget(&self) -> f64 {
        self.per_partition_budget
    }

    /// Capacity of the bounded record queue between workers and consumer.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// GraphQL `sortKey` enum value used to find the earliest record.
    #[must_use]
    pub fn sort_key(&self) -> Option<&str> {
        self.sort_key.as_deref()
    }

    /// Delay between bulk status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wall-clock limit for a bulk job to reach a terminal state.
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Largest page size the budget may request.
    #[must_use]
    pub const fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    /// Cost ceiling for a single query, kept below the provider cap.
    #[must_use]
    pub const fn max_safe_points(&self) -> f64 {
        self.max_safe_points
    }

    /// Retry policy for transient request failures.
    #[must_use]
    pub const fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// What to do with records that lack a replication-key value.
    #[must_use]
    pub const fn missing_key_policy(&self) -> MissingKeyPolicy {
        self.missing_key_policy
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfigBuilder::new().finish()
    }
}

// Verify ExtractConfig is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ExtractConfig>();
};

/// Builder for [`ExtractConfig`].
///
/// # Defaults
///
/// - `bulk_mode`, `apply_concurrency`, `monthly_chunking`: `false`
/// - `max_concurrency`: 4
/// - `per_partition_budget`: 1000 points
/// - `queue_capacity`: 1000 records
/// - `sort_key`: `None`
/// - `poll_interval`: 10 seconds
/// - `poll_timeout`: 30 minutes
/// - `max_page_size`: 250
/// - `max_safe_points`: 900
/// - `retry`: [`RetryPolicy::default`]
/// - `missing_key_policy`: [`MissingKeyPolicy::Ignore`]
#[derive(Debug, Default)]
pub struct ExtractConfigBuilder {
    bulk_mode: Option<bool>,
    apply_concurrency: Option<bool>,
    monthly_chunking: Option<bool>,
    max_concurrency: Option<usize>,
    per_partition_budget: Option<f64>,
    queue_capacity: Option<usize>,
    sort_key: Option<String>,
    poll_interval: Option<Duration>,
    poll_timeout: Option<Duration>,
    max_page_size: Option<u32>,
    max_safe_points: Option<f64>,
    retry: Option<RetryPolicy>,
    missing_key_policy: Option<MissingKeyPolicy>,
}

impl ExtractConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects bulk-operation extraction instead of cursor pagination.
    #[must_use]
    pub const fn bulk_mode(mut self, enabled: bool) -> Self {
        self.bulk_mode = Some(enabled);
        self
    }

    /// Enables partitioned concurrent fetching.
    #[must_use]
    pub const fn apply_concurrency(mut self, enabled: bool) -> Self {
        self.apply_concurrency = Some(enabled);
        self
    }

    /// Enables month-by-month walking of each partition's window.
    #[must_use]
    pub const fn monthly_chunking(mut self, enabled: bool) -> Self {
        self.monthly_chunking = Some(enabled);
        self
    }

    /// Sets the maximum number of concurrent partitions.
    #[must_use]
    pub const fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Sets the budget floor each partition must be able to claim.
    #[must_use]
    pub const fn per_partition_budget(mut self, points: f64) -> Self {
        self.per_partition_budget = Some(points);
        self
    }

    /// Sets the bounded queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets the secondary sort key (e.g. `UPDATED_AT`).
    #[must_use]
    pub fn sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Sets the bulk poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the bulk poll timeout.
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Sets the largest page size the budget may request.
    #[must_use]
    pub const fn max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = Some(size);
        self
    }

    /// Sets the per-query cost ceiling.
    #[must_use]
    pub const fn max_safe_points(mut self, points: f64) -> Self {
        self.max_safe_points = Some(points);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Sets the policy for records missing a replication-key value.
    #[must_use]
    pub const fn missing_key_policy(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key_policy = Some(policy);
        self
    }

    /// Builds the [`ExtractConfig`], validating every option.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for zero concurrency, zero queue
    /// capacity, a non-positive budget floor or cost ceiling, a page size
    /// outside `1..=250` or a zero poll interval, and
    /// [`ConfigError::PollTimeoutTooShort`] when the timeout is shorter than
    /// one poll interval.
    pub fn build(self) -> Result<ExtractConfig, ConfigError> {
        let config = self.finish();

        if config.max_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_concurrency",
                reason: "must be at least 1, got 0".to_string(),
            });
        }
        if config.queue_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "queue_capacity",
                reason: "must be at least 1, got 0".to_string(),
            });
        }
        if config.per_partition_budget.is_nan() || config.per_partition_budget <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "per_partition_budget",
                reason: format!("must be positive, got {}", config.per_partition_budget),
            });
        }
        if config.max_safe_points.is_nan() || config.max_safe_points <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "max_safe_points",
                reason: format!("must be positive, got {}", config.max_safe_points),
            });
        }
        if !(1..=PROVIDER_MAX_PAGE_SIZE).contains(&config.max_page_size) {
            return Err(ConfigError::OutOfRange {
                field: "max_page_size",
                reason: format!(
                    "must be between 1 and {PROVIDER_MAX_PAGE_SIZE}, got {}",
                    config.max_page_size
                ),
            });
        }
        if config.poll_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                field: "poll_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if config.poll_timeout < config.poll_interval {
            return Err(ConfigError::PollTimeoutTooShort {
                interval_secs: config.poll_interval.as_secs(),
                timeout_secs: config.poll_timeout.as_secs(),
            });
        }

        Ok(config)
    }

    fn finish(self) -> ExtractConfig {
        ExtractConfig {
            bulk_mode: self.bulk_mode.unwrap_or(false),
            apply_concurrency: self.apply_concurrency.unwrap_or(false),
            monthly_chunking: self.monthly_chunking.unwrap_or(false),
            max_concurrency: self.max_concurrency.unwrap_or(4),
            per_partition_budget: self.per_partition_budget.unwrap_or(1000.0),
            queue_capacity: self.queue_capacity.unwrap_or(1000),
            sort_key: self.sort_key,
            poll_interval: self.poll_interval.unwrap_or(Duration::from_secs(10)),
            poll_timeout: self.poll_timeout.unwrap_or(Duration::from_secs(30 * 60)),
            max_page_size: self.max_page_size.unwrap_or(PROVIDER_MAX_PAGE_SIZE),
            max_safe_points: self.max_safe_points.unwrap_or(900.0),
            retry: self.retry.unwrap_or_default(),
            missing_key_policy: self.missing_key_policy.unwrap_or_default(),
        }
    }
}
