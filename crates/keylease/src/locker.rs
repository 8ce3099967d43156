//! Lock primitives and the backoff acquirer
//!
//! Every ownership decision is delegated to one atomic store primitive:
//! acquisition is a set-if-absent, release and renewal are compare-then-act
//! scripts keyed on the holder identity.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keylease_common::{LockerConfig, default_holder};
use tracing::debug;

use crate::backoff::Backoff;
use crate::context::LockContext;
use crate::error::{LockError, Result};
use crate::metrics;
use crate::store::{Acquisition, LockStore};

/// Shortest TTL a lock may be taken with. Anything shorter cannot be renewed
/// safely.
pub const MIN_LOCK_TTL: Duration = Duration::from_secs(1);

/// Longest TTL a lock may be taken or extended with (365 days). Keeps every
/// deadline representable as an `Instant` and as Redis milliseconds.
pub const MAX_LOCK_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Handle for taking locks under one holder identity.
///
/// Cloning is cheap; clones share the store, holder, and configuration.
#[derive(Clone)]
pub struct Locker {
    store: Arc<dyn LockStore>,
    holder: Arc<str>,
    config: Arc<LockerConfig>,
}

impl std::fmt::Debug for Locker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locker")
            .field("holder", &self.holder)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Locker {
    /// Create a locker with default tuning and a freshly generated holder
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_config(store, LockerConfig::default())
    }

    pub fn with_config(store: Arc<dyn LockStore>, config: LockerConfig) -> Self {
        Self {
            store,
            holder: Arc::from(default_holder()),
            config: Arc::new(config),
        }
    }

    /// Replace the holder identity. Must be unique among all contenders.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Arc::from(holder.into());
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    fn check_ttl(ttl: Duration) -> Result<()> {
        if !(MIN_LOCK_TTL..=MAX_LOCK_TTL).contains(&ttl) {
            return Err(LockError::InvalidTtl {
                ttl,
                min: MIN_LOCK_TTL,
                max: MAX_LOCK_TTL,
            });
        }
        Ok(())
    }

    /// Try once to take `key` for `ttl`.
    ///
    /// `Ok(false)` means another holder has it.
    pub async fn lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        Self::check_ttl(ttl)?;
        self.try_lock(key, ttl).await
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.store.set_if_absent(key, &self.holder, ttl).await {
            Ok(acquired) => {
                metrics::record_lock_attempt(if acquired { "acquired" } else { "contended" });
                debug!(key = %key, holder = %self.holder, acquired, "Lock attempt");
                Ok(acquired)
            }
            Err(e) => {
                metrics::record_lock_attempt("error");
                Err(e.into())
            }
        }
    }

    /// Release `key` if this holder still owns it.
    ///
    /// `Ok(false)` means the lock had already expired or been taken over.
    pub async fn unlock(&self, key: &str) -> Result<bool> {
        match self.store.delete_if_equals(key, &self.holder).await {
            Ok(released) => {
                metrics::record_unlock(if released { "released" } else { "lost" });
                debug!(key = %key, holder = %self.holder, released, "Unlock");
                Ok(released)
            }
            Err(e) => {
                metrics::record_unlock("error");
                Err(e.into())
            }
        }
    }

    /// Reset the TTL of `key` to `ttl` if this holder still owns it.
    ///
    /// `Ok(false)` means ownership is gone; callers must stop relying on the
    /// lock rather than retry.
    pub async fn expire_lock_in(&self, key: &str, ttl: Duration) -> Result<bool> {
        Self::check_ttl(ttl)?;
        match self.store.expire_if_equals(key, &self.holder, ttl).await {
            Ok(extended) => {
                metrics::record_renewal(if extended { "extended" } else { "lost" });
                debug!(key = %key, holder = %self.holder, extended, "Lock expiry reset");
                Ok(extended)
            }
            Err(e) => {
                metrics::record_renewal("error");
                Err(e.into())
            }
        }
    }

    /// Retry [`lock`](Self::lock) with exponential backoff for up to `max_wait`.
    ///
    /// Returns `Ok(false)` if the key stayed held for the whole wait, an error
    /// as soon as the store fails, and [`LockError::Cancelled`] if `ctx` is
    /// cancelled first.
    pub async fn lock_backoff(
        &self,
        ctx: &LockContext,
        key: &str,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<bool> {
        Self::check_ttl(ttl)?;
        let outcome = self
            .retry_acquire(ctx, key, max_wait, move || async move {
                let acquired = self.try_lock(key, ttl).await?;
                Ok::<_, LockError>(Acquisition {
                    acquired,
                    holder: None,
                })
            })
            .await?;
        Ok(outcome.acquired)
    }

    /// Try once to take `key` storing `value`, reporting the current holder
    /// when someone else has it.
    pub async fn lock_with_value(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Acquisition> {
        Self::check_ttl(ttl)?;
        self.try_lock_with_value(key, value, ttl).await
    }

    async fn try_lock_with_value(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Acquisition> {
        match self.store.set_if_absent_or_get(key, value, ttl).await {
            Ok(outcome) => {
                metrics::record_lock_attempt(if outcome.acquired {
                    "acquired"
                } else {
                    "contended"
                });
                debug!(
                    key = %key,
                    acquired = outcome.acquired,
                    holder = ?outcome.holder,
                    "Lock attempt with value"
                );
                Ok(outcome)
            }
            Err(e) => {
                metrics::record_lock_attempt("error");
                Err(e.into())
            }
        }
    }

    /// Backoff variant of [`lock_with_value`](Self::lock_with_value). On
    /// give-up the last observed holder is returned.
    pub async fn backoff_lock_with_value(
        &self,
        ctx: &LockContext,
        key: &str,
        value: &str,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<Acquisition> {
        Self::check_ttl(ttl)?;
        self.retry_acquire(ctx, key, max_wait, move || {
            self.try_lock_with_value(key, value, ttl)
        })
        .await
    }

    async fn retry_acquire<F, Fut>(
        &self,
        ctx: &LockContext,
        key: &str,
        max_wait: Duration,
        mut attempt: F,
    ) -> Result<Acquisition>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Acquisition>>,
    {
        let mut backoff = Backoff::new(self.config.acquire_backoff.clone(), max_wait);
        loop {
            if ctx.is_cancelled() {
                return Err(LockError::Cancelled);
            }

            let outcome = attempt().await?;
            if outcome.acquired {
                return Ok(outcome);
            }

            let Some(delay) = backoff.next_delay() else {
                debug!(
                    key = %key,
                    waited = ?backoff.elapsed(),
                    retries = backoff.retries(),
                    "Gave up waiting for lock"
                );
                return Ok(outcome);
            };

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
