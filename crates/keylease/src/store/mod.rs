//! Backing store abstraction
//!
//! A lock store must evaluate every method below as one atomic step. The lock
//! code never composes a read with a later write, so correctness rests
//! entirely on these primitives.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::MemoryLockStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisLockStore;

/// Outcome of a set-if-absent that also reports the current holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// Whether this call created the record
    pub acquired: bool,
    /// Value stored at the key after the call (`None` if it vanished meanwhile)
    pub holder: Option<String>,
}

impl Acquisition {
    pub fn acquired(value: impl Into<String>) -> Self {
        Self {
            acquired: true,
            holder: Some(value.into()),
        }
    }

    pub fn contended(holder: Option<String>) -> Self {
        Self {
            acquired: false,
            holder,
        }
    }
}

/// Atomic primitives required from a key-value store
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `value` with expiry `ttl` only if `key` is absent
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Like `set_if_absent`, also returning the current value on contention
    async fn set_if_absent_or_get(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Acquisition, StoreError>;

    /// Delete `key` only if its value equals `token`
    async fn delete_if_equals(&self, key: &str, token: &str) -> Result<bool, StoreError>;

    /// Reset the expiry of `key` to `ttl` only if its value equals `token`
    async fn expire_if_equals(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}
