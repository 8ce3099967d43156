//! Lock error types
//!
//! Contention and ownership loss are normal outcomes and are reported as
//! `Ok(false)`; only validation, store, and cancellation failures are errors.

use std::time::Duration;

/// Failure talking to the backing store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Error returned by lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock ttl {ttl:?} is outside the allowed range {min:?}..={max:?}")]
    InvalidTtl {
        ttl: Duration,
        min: Duration,
        max: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("lock acquisition cancelled")]
    Cancelled,
}

impl LockError {
    /// True for argument validation failures that never reached the store
    pub fn is_validation(&self) -> bool {
        matches!(self, LockError::InvalidTtl { .. })
    }

    /// True for connectivity or protocol failures of the backing store
    pub fn is_store(&self) -> bool {
        matches!(self, LockError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
