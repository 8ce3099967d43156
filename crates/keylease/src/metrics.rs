// Lock metrics
// Fire-and-forget counters and gauges; no-ops until a recorder is installed

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub(crate) const LOCK_ATTEMPTS: &str = "keylease_lock_attempts_total";
pub(crate) const UNLOCKS: &str = "keylease_unlock_total";
pub(crate) const RENEWALS: &str = "keylease_renewals_total";
pub(crate) const LEASES_ENDED: &str = "keylease_leases_ended_total";
pub(crate) const LEASES_ACTIVE: &str = "keylease_leases_active";

/// Register metric descriptions. Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(
        LOCK_ATTEMPTS,
        "Lock acquisition attempts by result (acquired, contended, error)"
    );
    describe_counter!(UNLOCKS, "Unlock calls by result (released, lost, error)");
    describe_counter!(
        RENEWALS,
        "Lease renewal attempts by result (extended, lost, error)"
    );
    describe_counter!(LEASES_ENDED, "Leases ended by reason");
    describe_gauge!(LEASES_ACTIVE, "Leases currently supervised in this process");
}

pub(crate) fn record_lock_attempt(result: &'static str) {
    counter!(LOCK_ATTEMPTS, "result" => result).increment(1);
}

pub(crate) fn record_unlock(result: &'static str) {
    counter!(UNLOCKS, "result" => result).increment(1);
}

pub(crate) fn record_renewal(result: &'static str) {
    counter!(RENEWALS, "result" => result).increment(1);
}

pub(crate) fn record_lease_end(reason: &'static str) {
    counter!(LEASES_ENDED, "reason" => reason).increment(1);
}

/// Holds one unit of the active-lease gauge for as long as it lives
pub(crate) struct ActiveLease(());

impl ActiveLease {
    pub(crate) fn start() -> Self {
        gauge!(LEASES_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for ActiveLease {
    fn drop(&mut self) {
        gauge!(LEASES_ACTIVE).decrement(1.0);
    }
}
