// In-memory lock store
// Per-key records with deadlines, atomic through DashMap's per-shard locking

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{Acquisition, LockStore};
use crate::error::StoreError;

/// Deadline used when `now + ttl` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

/// A stored lock record
#[derive(Debug, Clone)]
struct Record {
    value: String,
    expires_at: Instant,
}

impl Record {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: deadline(ttl),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn is_held_by(&self, token: &str) -> bool {
        !self.is_expired() && self.value == token
    }
}

/// Process-local [`LockStore`].
///
/// Expired records are treated as absent by every primitive; the optional
/// sweeper only reclaims memory.
pub struct MemoryLockStore {
    records: Arc<DashMap<String, Record>>,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            cleanup_handle: None,
        }
    }

    /// Start a background task removing expired records every `interval`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn with_cleanup(mut self, interval: Duration) -> Self {
        let records = self.records.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = Self::purge_expired(&records);
                if removed > 0 {
                    debug!(count = removed, "Cleaned up expired lock records");
                }
            }
        });
        self.cleanup_handle = Some(handle);
        self
    }

    fn purge_expired(records: &DashMap<String, Record>) -> usize {
        let before = records.len();
        records.retain(|_, record| !record.is_expired());
        before.saturating_sub(records.len())
    }

    /// Current holder of `key`, if the record is live
    pub fn holder(&self, key: &str) -> Option<String> {
        self.records
            .get(key)
            .filter(|record| !record.is_expired())
            .map(|record| record.value.clone())
    }

    /// Time left before `key` expires, if the record is live
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        self.records
            .get(key)
            .filter(|record| !record.is_expired())
            .map(|record| record.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Number of stored records, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn try_insert(&self, key: &str, value: &str, ttl: Duration) -> Acquisition {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired() {
                    entry.insert(Record::new(value, ttl));
                    Acquisition::acquired(value)
                } else {
                    Acquisition::contended(Some(entry.get().value.clone()))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Record::new(value, ttl));
                Acquisition::acquired(value)
            }
        }
    }
}

impl Drop for MemoryLockStore {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(self.try_insert(key, value, ttl).acquired)
    }

    async fn set_if_absent_or_get(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Acquisition, StoreError> {
        Ok(self.try_insert(key, value, ttl))
    }

    async fn delete_if_equals(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .remove_if(key, |_, record| record.is_held_by(token))
            .is_some())
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        match self.records.get_mut(key) {
            Some(mut record) if record.is_held_by(token) => {
                record.expires_at = deadline(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
