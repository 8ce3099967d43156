//! Keylease - Lease-based distributed locks over a key-value store
//!
//! This crate provides:
//! - Single-shot lock, unlock, and TTL reset keyed on a holder identity
//! - Backoff acquisition bounded by a maximum wait
//! - Auto-renewed leases with a hard maximum hold time
//! - In-memory and Redis lock stores

pub mod backoff;
pub mod context;
pub mod error;
pub mod lease;
pub mod locker;
pub mod metrics;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use context::LockContext;
pub use error::{LockError, Result, StoreError};
pub use lease::{Lease, LeaseEnd};
pub use locker::{Locker, MAX_LOCK_TTL, MIN_LOCK_TTL};
pub use metrics::describe_metrics;
pub use store::{Acquisition, LockStore, MemoryLockStore};

#[cfg(feature = "redis")]
pub use store::RedisLockStore;

pub use keylease_common::{BackoffConfig, LockerConfig};
