//! Per job configuration.
//!
//! Every field has a documented default, so a job can be built with [`Config::default`] and only
//! the settings that matter to a deployment overridden.
//!
//! # Example
//!
//! ```
//! # use offload::prelude::*;
//! # use std::time::Duration;
//! let config = Config::default()
//!     .with_time_limit(Some(Duration::from_secs(10)))
//!     .with_memory_threshold(None)
//!     .with_item_delay(Duration::from_millis(50));
//!
//! assert_eq!(config.time_limit(), Some(Duration::from_secs(10)));
//! assert_eq!(config.memory_threshold(), None);
//! ```
use std::time::Duration;

const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(20);
const DEFAULT_MEMORY_THRESHOLD: f64 = 0.9;
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_KEY_MAX_LENGTH: usize = 64;

/// The memory ceiling assumed when neither the config nor the memory probe provides one.
pub const DEFAULT_MEMORY_CEILING: u64 = 128 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    lock_duration: Duration,
    time_limit: Option<Duration>,
    memory_threshold: Option<f64>,
    memory_limit: Option<u64>,
    item_delay: Duration,
    health_check_interval: Duration,
    key_max_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_duration: DEFAULT_LOCK_DURATION,
            time_limit: Some(DEFAULT_TIME_LIMIT),
            memory_threshold: Some(DEFAULT_MEMORY_THRESHOLD),
            memory_limit: None,
            item_delay: Duration::ZERO,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            key_max_length: DEFAULT_KEY_MAX_LENGTH,
        }
    }
}

impl Config {
    /// The TTL of the process lock. Defaults to 60 seconds.
    ///
    /// This should comfortably exceed [`Config::time_limit`]; a lock that expires while a drain
    /// loop is still running lets a second worker start.
    pub fn with_lock_duration(self, lock_duration: Duration) -> Self {
        Self {
            lock_duration,
            ..self
        }
    }

    /// The time budget of one invocation. Defaults to 20 seconds, [`None`] disables the check.
    pub fn with_time_limit(self, time_limit: Option<Duration>) -> Self {
        Self { time_limit, ..self }
    }

    /// The share of the memory ceiling at which an invocation hands off. Defaults to `0.9`,
    /// [`None`] disables the check.
    pub fn with_memory_threshold(self, memory_threshold: Option<f64>) -> Self {
        Self {
            memory_threshold,
            ..self
        }
    }

    /// The memory ceiling in bytes. By default the ceiling reported by the memory probe is used.
    pub fn with_memory_limit(self, memory_limit: Option<u64>) -> Self {
        Self {
            memory_limit,
            ..self
        }
    }

    /// A pause between items. Defaults to zero.
    pub fn with_item_delay(self, item_delay: Duration) -> Self {
        Self { item_delay, ..self }
    }

    /// How often the health checker runs. Defaults to 5 minutes and is never less than a minute.
    pub fn with_health_check_interval(self, health_check_interval: Duration) -> Self {
        Self {
            health_check_interval: health_check_interval.max(MIN_HEALTH_CHECK_INTERVAL),
            ..self
        }
    }

    /// The maximum length of a batch key. Defaults to 64 characters.
    pub fn with_key_max_length(self, key_max_length: usize) -> Self {
        Self {
            key_max_length,
            ..self
        }
    }

    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    pub fn memory_threshold(&self) -> Option<f64> {
        self.memory_threshold
    }

    pub fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }

    pub fn item_delay(&self) -> Duration {
        self.item_delay
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    pub fn key_max_length(&self) -> usize {
        self.key_max_length
    }
}
