//! Port abstraction for durable outbox persistence.
//!
//! The [`OutboxRepository`] trait defines the contract for enqueueing,
//! claiming, and resolving outbox rows. Adapters provide the exclusive-claim
//! discipline that keeps concurrent relay workers from publishing the same
//! row twice, and the crash-safe claim expiry that lets another worker retry
//! after a claimant dies.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::event::{NewOutboxEvent, OutboxEvent};

/// Errors raised by outbox repository adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutboxRepositoryError {
    /// Store connection could not be established.
    #[error("outbox store connection failed: {message}")]
    Connection { message: String },
    /// Query or mutation failed during execution.
    #[error("outbox store query failed: {message}")]
    Query { message: String },
    /// The referenced event does not exist.
    #[error("outbox event {id} not found")]
    NotFound { id: Uuid },
}

impl OutboxRepositoryError {
    /// Create a connection error with the given message.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a query error with the given message.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a not-found error for the given event id.
    #[must_use]
    pub const fn not_found(id: Uuid) -> Self {
        Self::NotFound { id }
    }
}

/// What happened to a row after a failed publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The row returned to pending and will be retried after its backoff.
    Retrying {
        /// Attempts consumed so far, including the one just recorded.
        attempt_count: i32,
    },
    /// The retry budget is exhausted; the row is parked in terminal failed
    /// status awaiting manual requeue.
    Parked,
}

/// Port for durable, ordered outbox storage.
///
/// Implementations must guarantee that a claim is exclusive: once
/// `claim_batch` returns a row to one worker, no other worker receives that
/// row until the claim expires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Persist a new pending event.
    ///
    /// This standalone form opens its own transaction. When the event must
    /// commit atomically with a business write, compose the adapter's
    /// with-connection insert into the caller's transaction instead.
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxRepositoryError>;

    /// Claim up to `limit` deliverable rows for `worker_id`.
    ///
    /// A row is deliverable when it is pending, unclaimed (or its claim has
    /// expired), past any retry backoff, and no earlier row with the same
    /// partition key is still unpublished. Claims expire after `claim_ttl`
    /// so a crashed worker cannot strand its batch.
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        claim_ttl: Duration,
    ) -> Result<Vec<OutboxEvent>, OutboxRepositoryError>;

    /// Mark an event published after a confirmed broker acknowledgment.
    ///
    /// Idempotent: marking an already-published event has no further effect.
    async fn mark_published(&self, id: Uuid) -> Result<(), OutboxRepositoryError>;

    /// Record a failed publish attempt.
    ///
    /// Increments the attempt count and releases the claim. Below the retry
    /// budget the row returns to pending with a backoff before its next
    /// attempt; at the budget it parks in terminal failed status. The
    /// disposition tells the caller which of the two happened.
    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<FailureDisposition, OutboxRepositoryError>;

    /// Release claims whose TTL has elapsed, returning how many were freed.
    async fn release_expired_claims(&self) -> Result<u64, OutboxRepositoryError>;

    /// Return terminally failed events for operator inspection.
    async fn list_failed(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxRepositoryError>;

    /// Manually requeue a terminally failed event.
    ///
    /// Resets the attempt budget and returns the row to pending; used for
    /// operator-driven replay after the underlying fault is fixed.
    async fn requeue_failed(&self, id: Uuid) -> Result<(), OutboxRepositoryError>;
}
