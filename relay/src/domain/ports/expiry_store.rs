//! Port abstraction for the shared key-value store with expiry.
//!
//! The duplicate-event detector and the rate limiter both ride on this
//! port. Each operation must be a single atomic round trip against the
//! shared store: a separate check-then-set pair would reintroduce the race
//! these components exist to prevent.

use std::time::Duration;

use async_trait::async_trait;

/// Errors raised by key-value store adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpiryStoreError {
    /// The store is unreachable. Callers apply their documented fail-open
    /// policy when they see this.
    #[error("key-value store unreachable: {message}")]
    Unavailable { message: String },
    /// The store was reachable but the operation failed.
    #[error("key-value store operation failed: {message}")]
    Operation { message: String },
}

impl ExpiryStoreError {
    /// Create an unavailability error with the given message.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create an operation error with the given message.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }
}

/// Port for atomic key-value operations with expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExpiryStore: Send + Sync {
    /// Atomically set `key` with `ttl` if it is absent.
    ///
    /// Returns `true` when the key was newly set, `false` when it already
    /// existed. The test and the set are one store-side operation.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, ExpiryStoreError>;

    /// Refresh the expiry of an existing key; absent keys are left absent.
    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), ExpiryStoreError>;

    /// Delete `key` immediately; removing an absent key is a no-op.
    async fn remove(&self, key: &str) -> Result<(), ExpiryStoreError>;

    /// Atomically increment the counter at `key`, setting `window` as its
    /// expiry if this is the first increment of the window.
    ///
    /// Returns the post-increment count.
    async fn increment(&self, key: &str, window: Duration) -> Result<i64, ExpiryStoreError>;

    /// Read the current counter without perturbing it or its expiry.
    async fn current_count(&self, key: &str) -> Result<Option<i64>, ExpiryStoreError>;
}

/// Fixture implementation for tests that do not exercise store behaviour.
///
/// Every key is always absent: `set_if_absent` reports a fresh set,
/// `increment` counts from one each call, and reads find nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureExpiryStore;

#[async_trait]
impl ExpiryStore for FixtureExpiryStore {
    async fn set_if_absent(&self, _key: &str, _ttl: Duration) -> Result<bool, ExpiryStoreError> {
        Ok(true)
    }

    async fn refresh_expiry(&self, _key: &str, _ttl: Duration) -> Result<(), ExpiryStoreError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<(), ExpiryStoreError> {
        Ok(())
    }

    async fn increment(&self, _key: &str, _window: Duration) -> Result<i64, ExpiryStoreError> {
        Ok(1)
    }

    async fn current_count(&self, _key: &str) -> Result<Option<i64>, ExpiryStoreError> {
        Ok(None)
    }
}
