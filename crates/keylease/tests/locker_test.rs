// Integration tests for Locker and Lease
// Tests mutual exclusion, ownership checks, backoff bounds, and lease lifecycle

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keylease::{
    Acquisition, LeaseEnd, LockContext, LockError, LockStore, Locker, MemoryLockStore,
    StoreError,
};
use tokio::time::Instant;

/// Memory store that counts deletes, for asserting on unlock calls
#[derive(Default)]
struct CountingStore {
    inner: MemoryLockStore,
    deletes: AtomicUsize,
}

impl CountingStore {
    fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockStore for CountingStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn set_if_absent_or_get(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Acquisition, StoreError> {
        self.inner.set_if_absent_or_get(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_if_equals(key, token).await
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.expire_if_equals(key, token, ttl).await
    }
}

fn memory_store() -> Arc<MemoryLockStore> {
    Arc::new(MemoryLockStore::new())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lock_is_mutually_exclusive() {
    let store = memory_store();
    let mut handles = Vec::new();

    for i in 0..32 {
        let locker = Locker::new(store.clone()).with_holder(format!("worker-{i}"));
        handles.push(tokio::spawn(async move {
            locker.lock("job:42", Duration::from_secs(10)).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(store.holder("job:42").unwrap().starts_with("worker-"));
}

#[tokio::test]
async fn test_lock_twice_with_different_holders() {
    let store = memory_store();
    let x = Locker::new(store.clone());
    let y = Locker::new(store);

    assert!(x.lock("job:42", Duration::from_secs(2)).await.unwrap());
    assert!(!y.lock("job:42", Duration::from_secs(2)).await.unwrap());
}

#[tokio::test]
async fn test_unlock_frees_key_for_next_holder() {
    let store = memory_store();
    let x = Locker::new(store.clone()).with_holder("x");
    let y = Locker::new(store).with_holder("y");

    assert!(x.lock("job:42", Duration::from_secs(1)).await.unwrap());
    assert!(x.unlock("job:42").await.unwrap());
    assert!(!x.unlock("job:42").await.unwrap());
    assert!(y.lock("job:42", Duration::from_secs(1)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_foreign_renewal_does_not_touch_ttl() {
    let store = memory_store();
    let a = Locker::new(store.clone()).with_holder("a");
    let b = Locker::new(store.clone()).with_holder("b");

    assert!(a.lock("job:42", Duration::from_secs(2)).await.unwrap());
    assert!(!b.expire_lock_in("job:42", Duration::from_secs(60)).await.unwrap());
    assert_eq!(store.remaining_ttl("job:42"), Some(Duration::from_secs(2)));
}

#[tokio::test(start_paused = true)]
async fn test_expired_lock_can_be_taken_over() {
    let store = memory_store();
    let a = Locker::new(store.clone()).with_holder("a");
    let b = Locker::new(store.clone()).with_holder("b");

    assert!(a.lock("job:42", Duration::from_secs(1)).await.unwrap());
    tokio::time::advance(Duration::from_millis(1001)).await;

    assert!(b.lock("job:42", Duration::from_secs(1)).await.unwrap());
    // The zombie holder can neither renew nor release the new lease
    assert!(!a.expire_lock_in("job:42", Duration::from_secs(1)).await.unwrap());
    assert!(!a.unlock("job:42").await.unwrap());
    assert_eq!(store.holder("job:42").as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn test_lock_backoff_against_held_key_respects_max_wait() {
    let store = memory_store();
    let owner = Locker::new(store.clone());
    let waiter = Locker::new(store);
    assert!(owner.lock("job:42", Duration::from_secs(60)).await.unwrap());

    let ctx = LockContext::background();
    let started = Instant::now();
    let acquired = waiter
        .lock_backoff(&ctx, "job:42", Duration::from_secs(1), Duration::from_millis(300))
        .await
        .unwrap();
    let waited = started.elapsed();

    assert!(!acquired);
    assert!(waited >= Duration::from_millis(250), "returned after {waited:?}");
    assert!(waited <= Duration::from_millis(600), "returned after {waited:?}");
}

#[tokio::test]
async fn test_short_ttl_is_rejected() {
    let locker = Locker::new(memory_store());
    let ctx = LockContext::background();

    let err = locker
        .lock_with_renew(&ctx, "job:42", Duration::from_millis(500), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::InvalidTtl { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_lease_ends_at_max_hold_with_one_unlock() {
    let store = Arc::new(CountingStore::default());
    let locker = Locker::new(store.clone());
    let ctx = LockContext::background();

    let started = Instant::now();
    let lease = locker
        .lock_with_renew(&ctx, "job:42", Duration::from_secs(1), Duration::from_secs(3))
        .await
        .unwrap();
    assert!(lease.is_locked());

    lease.done().await;
    let held = started.elapsed();
    assert!(held >= Duration::from_secs(3), "lease ended early: {held:?}");
    assert!(held < Duration::from_millis(3500), "lease ended late: {held:?}");
    assert!(!ctx.is_cancelled());

    assert_eq!(lease.finished().await, Some(LeaseEnd::MaxHoldReached));
    assert_eq!(store.deletes(), 1);
    assert!(store.inner.holder("job:42").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_lease_outlives_ttl_while_renewed() {
    let store = memory_store();
    let locker = Locker::new(store.clone());
    let rival = Locker::new(store.clone());
    let ctx = LockContext::background();

    let lease = locker
        .lock_with_renew(&ctx, "job:42", Duration::from_secs(1), Duration::from_secs(5))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3200)).await;
    assert!(!lease.context().is_cancelled());
    assert!(!rival.lock("job:42", Duration::from_secs(1)).await.unwrap());

    lease.release().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_lock_for_other_holder() {
    let store = memory_store();
    let locker = Locker::new(store.clone());
    let other = Locker::new(store.clone());
    let ctx = LockContext::background();

    let lease = locker
        .lock_with_renew(&ctx, "job:42", Duration::from_secs(1), Duration::from_secs(30))
        .await
        .unwrap();
    lease.cancel();

    tokio::time::timeout(Duration::from_millis(50), lease.done())
        .await
        .expect("lease context should be done right after cancel");
    assert_eq!(lease.release().await, Some(LeaseEnd::Cancelled));
    assert!(other.lock("job:42", Duration::from_secs(1)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancel_ends_lease_within_one_tick() {
    let store = Arc::new(CountingStore::default());
    let locker = Locker::new(store.clone());
    let parent = LockContext::background();

    let lease = locker
        .lock_with_renew(&parent, "job:42", Duration::from_secs(4), Duration::from_secs(60))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let cancelled_at = Instant::now();
    parent.cancel();

    let end = lease.finished().await;
    assert_eq!(end, Some(LeaseEnd::Cancelled));
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(store.deletes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_acquisition_returns_parent_context() {
    let store = memory_store();
    let owner = Locker::new(store.clone());
    let locker = Locker::new(store);
    assert!(owner.lock("job:42", Duration::from_secs(60)).await.unwrap());

    let parent = LockContext::background();
    let lease = locker
        .lock_backoff_with_renew(&parent, "job:42", Duration::from_secs(1), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(!lease.is_locked());
    assert!(lease.context().same_as(&parent));
    lease.cancel();
    assert!(!parent.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_handover_between_leases() {
    let store = memory_store();
    let first = Locker::new(store.clone()).with_holder("first");
    let second = Locker::new(store.clone()).with_holder("second");
    let ctx = LockContext::background();

    let lease = first
        .lock_with_renew(&ctx, "job:42", Duration::from_secs(1), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(lease.is_locked());

    // Second contender waits through the whole first lease
    let waiter = tokio::spawn({
        let ctx = ctx.clone();
        async move {
            second
                .lock_backoff_with_renew(
                    &ctx,
                    "job:42",
                    Duration::from_secs(1),
                    Duration::from_secs(2),
                )
                .await
        }
    });

    assert_eq!(lease.finished().await, Some(LeaseEnd::MaxHoldReached));
    let next = waiter.await.unwrap().unwrap();
    assert!(next.is_locked());
    assert_eq!(store.holder("job:42").as_deref(), Some("second"));
    next.release().await;
}
