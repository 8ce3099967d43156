//! Configuration management for keylease
//!
//! Configuration is layered: built-in defaults, then an optional file, then
//! environment variables prefixed with `KEYLEASE_` (nested keys separated by
//! `__`, e.g. `KEYLEASE_STORE__REDIS_URL`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::KeyleaseError;
use crate::logging::LoggingConfig;
use crate::{DEFAULT_CONFIG_FILE, ENV_PREFIX, ENV_SEPARATOR};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyleaseConfig {
    pub locker: LockerConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl KeyleaseConfig {
    /// Load configuration from defaults, an optional file, and the environment.
    ///
    /// When `path` is `None`, `keylease.{yml,toml,json}` in the working
    /// directory is used if present.
    pub fn load(path: Option<&Path>) -> Result<Self, KeyleaseError> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: KeyleaseConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the lock misbehave
    pub fn validate(&self) -> Result<(), KeyleaseError> {
        self.locker.validate()?;
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_empty() {
            return Err(KeyleaseError::InvalidConfig(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub initial_interval_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub max_interval_ms: u64,
    /// Growth factor applied after every attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Randomization factor (0.0 to 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_jitter() -> f64 {
    0.5
}

impl BackoffConfig {
    pub fn new(initial_interval_ms: u64, max_interval_ms: u64) -> Self {
        Self {
            initial_interval_ms,
            max_interval_ms,
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }

    /// Backoff used between lock acquisition attempts
    pub fn acquire() -> Self {
        Self::new(50, 300)
    }

    /// Backoff used between lease renewal retries
    pub fn renew() -> Self {
        Self::new(20, 100)
    }

    /// Same parameters without randomization
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Calculate the delay for a given retry attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay = self.initial_interval_ms as f64 * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_interval_ms as f64);

        let jitter_range = capped_delay * self.jitter;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_delay = (capped_delay + jitter).max(0.0) as u64;

        Duration::from_millis(final_delay)
    }

    fn validate(&self, name: &str) -> Result<(), KeyleaseError> {
        if self.initial_interval_ms == 0 || self.initial_interval_ms > self.max_interval_ms {
            return Err(KeyleaseError::InvalidConfig(format!(
                "{name}: initial_interval_ms must be in 1..=max_interval_ms"
            )));
        }
        if self.multiplier < 1.0 {
            return Err(KeyleaseError::InvalidConfig(format!(
                "{name}: multiplier must be >= 1.0"
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(KeyleaseError::InvalidConfig(format!(
                "{name}: jitter must be within 0.0..=1.0"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Locker
// ============================================================================

/// Tuning for acquisition retries and lease renewal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockerConfig {
    /// Backoff between acquisition attempts
    pub acquire_backoff: BackoffConfig,
    /// Acquisition wait bound used by `lock_backoff_with_renew`
    pub acquire_max_wait_ms: u64,
    /// Backoff between renewal retries inside one renewal tick
    pub renew_backoff: BackoffConfig,
    /// Total retry budget for one renewal tick
    pub renew_max_elapsed_ms: u64,
    /// Floor for the renewal interval
    pub min_renew_interval_ms: u64,
    /// The renewal interval is `ttl / renew_divisor`
    pub renew_divisor: u32,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            acquire_backoff: BackoffConfig::acquire(),
            acquire_max_wait_ms: 3000,
            renew_backoff: BackoffConfig::renew(),
            renew_max_elapsed_ms: 300,
            min_renew_interval_ms: 1000,
            renew_divisor: 4,
        }
    }
}

impl LockerConfig {
    pub fn acquire_max_wait(&self) -> Duration {
        Duration::from_millis(self.acquire_max_wait_ms)
    }

    pub fn renew_max_elapsed(&self) -> Duration {
        Duration::from_millis(self.renew_max_elapsed_ms)
    }

    /// Renewal cadence for a lease of the given TTL.
    ///
    /// The base cadence is `max(floor, ttl / divisor)`, i.e. `max(1s, ttl/4)`
    /// with defaults. On top of that the result is capped at `ttl / 2` as a
    /// safety margin: without the cap a 1s lease would be renewed every 1s, at
    /// the very instant it expires. With the cap it renews every 500ms. TTLs
    /// of 2s and more are unaffected.
    pub fn renew_interval(&self, ttl: Duration) -> Duration {
        let divided = ttl / self.renew_divisor.max(1);
        divided
            .max(Duration::from_millis(self.min_renew_interval_ms))
            .min(ttl / 2)
    }

    pub fn validate(&self) -> Result<(), KeyleaseError> {
        self.acquire_backoff.validate("locker.acquire_backoff")?;
        self.renew_backoff.validate("locker.renew_backoff")?;
        if self.renew_divisor == 0 {
            return Err(KeyleaseError::InvalidConfig(
                "locker.renew_divisor must be positive".to_string(),
            ));
        }
        if self.min_renew_interval_ms == 0 {
            return Err(KeyleaseError::InvalidConfig(
                "locker.min_renew_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

/// Backing store implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store, useful for tests and single-process deployments
    #[default]
    Memory,
    /// Redis (or any server speaking its protocol with Lua scripting)
    Redis,
}

/// Backing store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Sweep interval for expired entries in the memory store (0 disables)
    pub cleanup_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: String::new(),
            cleanup_interval_ms: 5000,
        }
    }
}
