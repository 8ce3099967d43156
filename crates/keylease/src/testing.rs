// Test double: a memory store that counts calls and injects failures

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{Acquisition, LockStore, MemoryLockStore};

#[derive(Default)]
pub(crate) struct ScriptedStore {
    inner: MemoryLockStore,
    set_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    expire_calls: AtomicUsize,
    fail_all: AtomicBool,
    fail_unlock: AtomicBool,
    /// Number of upcoming expire calls that fail with a connection error
    expire_failures: AtomicUsize,
    /// Report ownership loss on every expire call
    lose_on_expire: AtomicBool,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inner(&self) -> &MemoryLockStore {
        &self.inner
    }

    pub(crate) fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn expire_calls(&self) -> usize {
        self.expire_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_unlock(&self, fail: bool) {
        self.fail_unlock.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_expires(&self, count: usize) {
        self.expire_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn lose_on_expire(&self, lose: bool) {
        self.lose_on_expire.store(lose, Ordering::SeqCst);
    }

    fn check_fail_all(&self) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockStore for ScriptedStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail_all()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn set_if_absent_or_get(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Acquisition, StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail_all()?;
        self.inner.set_if_absent_or_get(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail_all()?;
        if self.fail_unlock.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection reset".to_string()));
        }
        self.inner.delete_if_equals(key, token).await
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.expire_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fail_all()?;
        let pending = self
            .expire_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::Connection("i/o timeout".to_string()));
        }
        if self.lose_on_expire.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.expire_if_equals(key, token, ttl).await
    }
}
