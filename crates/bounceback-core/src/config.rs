//! Configuration for the store and sync engine

use std::time::Duration;

use crate::crypto::KEY_LEN;

const MB: u64 = 1024 * 1024;

/// Storage quota thresholds and measurement cadence
#[derive(Debug, Clone, Copy)]
pub struct QuotaConfig {
    /// At/above this size a warning event is emitted (default 20 MB)
    pub soft_limit_bytes: u64,
    /// At/above this size size-increasing writes are rejected (default 25 MB)
    pub hard_limit_bytes: u64,
    /// How often the on-disk size is re-measured
    pub measure_interval: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            soft_limit_bytes: 20 * MB,
            hard_limit_bytes: 25 * MB,
            measure_interval: Duration::from_secs(60),
        }
    }
}

impl QuotaConfig {
    /// Override both limits, e.g. for tests with tiny stores
    #[must_use]
    pub const fn with_limits(mut self, soft_bytes: u64, hard_bytes: u64) -> Self {
        self.soft_limit_bytes = soft_bytes;
        self.hard_limit_bytes = hard_bytes;
        self
    }
}

/// Exponential backoff policy for failed queue entries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Attempts before an entry is abandoned
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5 * 60),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt: `base * factor^attempts`, capped
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempts.min(16) as i32);
        let delay = self.base_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Configuration for opening a [`crate::db::LocalStore`]
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub quota: QuotaConfig,
    /// Retry budget and backoff stamped onto queue entries
    pub retry: RetryPolicy,
    /// Key for columns encrypted at rest; required once any encrypted kind
    /// is written
    pub encryption_key: Option<[u8; KEY_LEN]>,
}

impl StoreConfig {
    #[must_use]
    pub const fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_encryption_key(mut self, key: [u8; KEY_LEN]) -> Self {
        self.encryption_key = Some(key);
        self
    }
}

/// Tunables for the sync engine
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Maximum queue entries per push request
    pub batch_size: usize,
    /// Periodic sync trigger; `None` disables the timer
    pub sync_interval: Option<Duration>,
    /// Bound on each remote request
    pub request_timeout: Duration,
    /// Pause before returning to idle after an unrecoverable cycle error
    pub error_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            sync_interval: Some(Duration::from_secs(5 * 60)),
            request_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(30),
        }
    }
}

impl SyncSettings {
    /// Disable the periodic trigger (manual and event-driven sync only)
    #[must_use]
    pub const fn without_interval(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
}
