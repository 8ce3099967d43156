//! Auto-renewed leases
//!
//! A successful `lock_with_renew` spawns one supervisor task per lease. The
//! supervisor keeps extending the lock's TTL until the lease context is
//! cancelled, `max_hold` elapses, or a renewal shows the lock is gone. On any
//! of those it cancels the lease context and makes a best-effort unlock.
//!
//! The lease context is the only signal the holder gets: once it is
//! cancelled, ownership must no longer be assumed.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::context::LockContext;
use crate::error::Result;
use crate::locker::Locker;
use crate::metrics;

/// Why a lease ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEnd {
    /// The lease context (or one of its ancestors) was cancelled
    Cancelled,
    /// `max_hold` elapsed
    MaxHoldReached,
    /// A renewal found the lock no longer held by this holder
    Lost,
    /// Renewal kept failing for the whole retry budget
    RenewFailed,
}

impl LeaseEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseEnd::Cancelled => "cancelled",
            LeaseEnd::MaxHoldReached => "max_hold_reached",
            LeaseEnd::Lost => "lost",
            LeaseEnd::RenewFailed => "renew_failed",
        }
    }
}

impl std::fmt::Display for LeaseEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `lock_with_renew` / `lock_backoff_with_renew`.
///
/// When the lock was not acquired, `context()` is the caller's context and
/// `cancel()` does nothing. Dropping a held lease cancels it.
pub struct Lease {
    locked: bool,
    key: String,
    ttl: Duration,
    max_hold: Duration,
    context: LockContext,
    supervisor: Option<JoinHandle<LeaseEnd>>,
}

impl Lease {
    fn not_acquired(key: &str, ttl: Duration, max_hold: Duration, parent: &LockContext) -> Self {
        Self {
            locked: false,
            key: key.to_string(),
            ttl,
            max_hold,
            context: parent.clone(),
            supervisor: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_hold(&self) -> Duration {
        self.max_hold
    }

    /// Context to watch while doing protected work
    pub fn context(&self) -> &LockContext {
        &self.context
    }

    /// Resolves when the lease context is cancelled
    pub async fn done(&self) {
        self.context.cancelled().await
    }

    /// End the lease early. The unlock happens asynchronously.
    pub fn cancel(&self) {
        if self.locked {
            self.context.cancel();
        }
    }

    /// Cancel the lease and wait until the supervisor has attempted its unlock.
    ///
    /// Returns the reason the lease ended, or `None` if it was never held.
    pub async fn release(mut self) -> Option<LeaseEnd> {
        self.cancel();
        self.join_supervisor().await
    }

    /// Wait for the lease to end on its own (max hold, loss, or cancellation
    /// from elsewhere) without cancelling it.
    pub async fn finished(mut self) -> Option<LeaseEnd> {
        self.join_supervisor().await
    }

    async fn join_supervisor(&mut self) -> Option<LeaseEnd> {
        let handle = self.supervisor.take()?;
        match handle.await {
            Ok(end) => Some(end),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Lease supervisor did not complete");
                None
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("locked", &self.locked)
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("max_hold", &self.max_hold)
            .field("context", &self.context)
            .finish()
    }
}

impl Locker {
    /// Take `key` once and, on success, keep it alive in the background for
    /// at most `max_hold`.
    pub async fn lock_with_renew(
        &self,
        ctx: &LockContext,
        key: &str,
        ttl: Duration,
        max_hold: Duration,
    ) -> Result<Lease> {
        let locked = self.lock(key, ttl).await?;
        Ok(self.start_lease(ctx, key, ttl, max_hold, locked))
    }

    /// Like [`lock_with_renew`](Self::lock_with_renew), retrying acquisition
    /// with backoff for up to `acquire_max_wait_ms`.
    pub async fn lock_backoff_with_renew(
        &self,
        ctx: &LockContext,
        key: &str,
        ttl: Duration,
        max_hold: Duration,
    ) -> Result<Lease> {
        let max_wait = self.config().acquire_max_wait();
        let locked = self.lock_backoff(ctx, key, ttl, max_wait).await?;
        Ok(self.start_lease(ctx, key, ttl, max_hold, locked))
    }

    fn start_lease(
        &self,
        ctx: &LockContext,
        key: &str,
        ttl: Duration,
        max_hold: Duration,
        locked: bool,
    ) -> Lease {
        if !locked {
            return Lease::not_acquired(key, ttl, max_hold, ctx);
        }

        let context = ctx.child();
        let supervisor = RenewalSupervisor {
            locker: self.clone(),
            context: context.clone(),
            key: key.to_string(),
            ttl,
            max_hold,
        };
        let handle = tokio::spawn(supervisor.run());

        Lease {
            locked: true,
            key: key.to_string(),
            ttl,
            max_hold,
            context,
            supervisor: Some(handle),
        }
    }
}

struct RenewalSupervisor {
    locker: Locker,
    context: LockContext,
    key: String,
    ttl: Duration,
    max_hold: Duration,
}

impl RenewalSupervisor {
    async fn run(self) -> LeaseEnd {
        let interval = self.locker.config().renew_interval(self.ttl);
        // Decrements the active gauge even if this task is aborted
        let _active = metrics::ActiveLease::start();
        info!(
            key = %self.key,
            holder = %self.locker.holder(),
            ttl = ?self.ttl,
            max_hold = ?self.max_hold,
            interval = ?interval,
            "Lease started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_hold = tokio::time::sleep(self.max_hold);
        tokio::pin!(max_hold);

        let end = loop {
            tokio::select! {
                biased;
                _ = self.context.cancelled() => break LeaseEnd::Cancelled,
                _ = &mut max_hold => break LeaseEnd::MaxHoldReached,
                _ = ticker.tick() => {
                    // Stay responsive to cancellation and max hold while retrying
                    let renewed = tokio::select! {
                        biased;
                        _ = self.context.cancelled() => break LeaseEnd::Cancelled,
                        _ = &mut max_hold => break LeaseEnd::MaxHoldReached,
                        renewed = self.renew() => renewed,
                    };
                    match renewed {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(key = %self.key, "Lease lost before renewal");
                            break LeaseEnd::Lost;
                        }
                        Err(e) => {
                            warn!(key = %self.key, error = %e, "Lease renewal failed, giving up");
                            break LeaseEnd::RenewFailed;
                        }
                    }
                }
            }
        };

        self.context.cancel();
        self.unlock_quietly().await;

        metrics::record_lease_end(end.as_str());
        info!(key = %self.key, reason = %end, "Lease ended");
        end
    }

    /// One renewal with a short local retry for transient store errors.
    /// `Ok(false)` is final and never retried.
    async fn renew(&self) -> Result<bool> {
        let config = self.locker.config();
        let mut backoff = Backoff::new(config.renew_backoff.clone(), config.renew_max_elapsed());
        loop {
            match self.locker.expire_lock_in(&self.key, self.ttl).await {
                Ok(extended) => return Ok(extended),
                Err(e) => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(e);
                    };
                    warn!(
                        key = %self.key,
                        error = %e,
                        retry = backoff.retries(),
                        "Lease renewal failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn unlock_quietly(&self) {
        match self.locker.unlock(&self.key).await {
            Ok(true) => debug!(key = %self.key, "Lease lock released"),
            Ok(false) => debug!(key = %self.key, "Lease lock already gone"),
            Err(e) => warn!(key = %self.key, error = %e, "Failed to release lease lock"),
        }
    }
}
