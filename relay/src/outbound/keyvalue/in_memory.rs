//! Clock-driven in-memory expiry store.
//!
//! Single-process stand-in for the Redis adapter, used by tests and local
//! runs. Expiry is evaluated lazily against the injected clock on each
//! access, so tests can advance time without waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;

use crate::domain::ports::{ExpiryStore, ExpiryStoreError};

#[derive(Debug, Clone)]
struct Entry {
    count: i64,
    expires_at: DateTime<Utc>,
}

/// In-memory [`ExpiryStore`] with lazy, clock-based expiry.
pub struct InMemoryExpiryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryExpiryStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn expiry_from(
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, ExpiryStoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|error| ExpiryStoreError::operation(error.to_string()))?;
        Ok(now + ttl)
    }

    fn is_expired(entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at <= now
    }
}

#[async_trait]
impl ExpiryStore for InMemoryExpiryStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, ExpiryStoreError> {
        let now = self.clock.utc();
        let expires_at = Self::expiry_from(now, ttl)?;
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            // A live entry wins; its TTL is not refreshed by a lost race.
            Some(entry) if !Self::is_expired(entry, now) => Ok(false),
            _ => {
                entries.insert(
                    key.to_owned(),
                    Entry {
                        count: 1,
                        expires_at,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), ExpiryStoreError> {
        let now = self.clock.utc();
        let expires_at = Self::expiry_from(now, ttl)?;
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(key) {
            if !Self::is_expired(entry, now) {
                entry.expires_at = expires_at;
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ExpiryStoreError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<i64, ExpiryStoreError> {
        let now = self.clock.utc();
        let expires_at = Self::expiry_from(now, window)?;
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .entry(key.to_owned())
            .and_modify(|entry| {
                if Self::is_expired(entry, now) {
                    // A fresh window starts on the first increment after
                    // expiry.
                    entry.count = 0;
                    entry.expires_at = expires_at;
                }
            })
            .or_insert(Entry {
                count: 0,
                expires_at,
            });
        entry.count += 1;
        Ok(entry.count)
    }

    async fn current_count(&self, key: &str) -> Result<Option<i64>, ExpiryStoreError> {
        let now = self.clock.utc();
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|entry| !Self::is_expired(entry, now))
            .map(|entry| entry.count))
    }
}
