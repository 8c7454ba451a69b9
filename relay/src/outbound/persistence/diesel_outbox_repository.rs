//! PostgreSQL-backed `OutboxRepository` implementation using Diesel.
//!
//! Claim exclusivity rides on `FOR UPDATE SKIP LOCKED` plus the
//! `claimed_until` column: a live claim hides the row from other workers,
//! and an expired claim is reclaimable without coordination. Per-key
//! ordering is enforced at claim time by only handing out the oldest
//! unpublished row of each partition key; the rows behind it become
//! claimable as their predecessors publish.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamptz};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;
use uuid::Uuid;

use crate::domain::event::{EventStatus, NewOutboxEvent, OutboxEvent};
use crate::domain::ports::{FailureDisposition, OutboxRepository, OutboxRepositoryError};

use super::models::{row_to_event, NewOutboxEventRow, OutboxEventRow};
use super::pool::{DbPool, PoolError};
use super::schema::outbox_events;

/// Claim the oldest deliverable row per partition key.
///
/// A row is deliverable when it is pending, unclaimed or claim-expired,
/// past its retry backoff, and has no older unpublished sibling with the
/// same partition key. `SKIP LOCKED` keeps concurrent claimants from
/// blocking on each other.
const CLAIM_BATCH_SQL: &str = r"
WITH claimable AS (
    SELECT o.id
    FROM outbox_events AS o
    WHERE o.status = 'pending'
      AND (o.claimed_until IS NULL OR o.claimed_until <= $1)
      AND (o.next_attempt_at IS NULL OR o.next_attempt_at <= $2)
      AND NOT EXISTS (
          SELECT 1
          FROM outbox_events AS prior
          WHERE prior.partition_key = o.partition_key
            AND prior.created_at < o.created_at
            AND prior.status <> 'published'
      )
    ORDER BY o.created_at
    LIMIT $3
    FOR UPDATE OF o SKIP LOCKED
)
UPDATE outbox_events
SET claimed_by = $4,
    claimed_until = $5
FROM claimable
WHERE outbox_events.id = claimable.id
RETURNING outbox_events.*
";

/// Retry schedule applied when a publish attempt fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a row parks in terminal failed status.
    pub max_attempts: i32,
    /// Backoff before the second attempt; doubles per attempt thereafter.
    pub base_backoff: Duration,
    /// Upper bound on the doubling.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt, given the attempts consumed so far.
    #[must_use]
    pub fn backoff_for(&self, attempt_count: i32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).clamp(0, 16);
        let factor = 2u32.saturating_pow(exponent as u32);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Diesel-backed implementation of the `OutboxRepository` port.
#[derive(Clone)]
pub struct DieselOutboxRepository {
    pool: DbPool,
    retry: RetryPolicy,
}

impl DieselOutboxRepository {
    /// Create a repository with the default retry policy.
    pub fn new(pool: DbPool) -> Self {
        Self::with_retry_policy(pool, RetryPolicy::default())
    }

    /// Create a repository with an explicit retry policy.
    pub fn with_retry_policy(pool: DbPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    /// Insert a pending event on an existing connection.
    ///
    /// This is the transactional composition point: call it inside the same
    /// transaction as the business write so the event commits or rolls back
    /// with the state change it describes.
    ///
    /// # Errors
    ///
    /// Returns a query error when the insert fails.
    pub async fn enqueue_in(
        conn: &mut AsyncPgConnection,
        event: &NewOutboxEvent,
    ) -> Result<OutboxEvent, OutboxRepositoryError> {
        let new_row = NewOutboxEventRow {
            id: Uuid::new_v4(),
            aggregate_type: &event.aggregate_type,
            aggregate_id: &event.aggregate_id,
            event_type: &event.event_type,
            payload: &event.payload,
            topic: &event.topic,
            partition_key: &event.partition_key,
            status: EventStatus::Pending.as_str(),
        };

        let row: OutboxEventRow = diesel::insert_into(outbox_events::table)
            .values(&new_row)
            .returning(OutboxEventRow::as_returning())
            .get_result(conn)
            .await
            .map_err(map_diesel_error)?;
        row_to_event(row)
    }
}

/// Map pool errors to the port's connection failures.
fn map_pool_error(error: PoolError) -> OutboxRepositoryError {
    match error {
        PoolError::Checkout { message } | PoolError::Build { message } => {
            OutboxRepositoryError::connection(message)
        }
    }
}

/// Map Diesel errors to the port's failure categories.
fn map_diesel_error(error: diesel::result::Error) -> OutboxRepositoryError {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::NotFound => OutboxRepositoryError::query("record not found"),
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            OutboxRepositoryError::connection("database connection error")
        }
        _ => OutboxRepositoryError::query("database error"),
    }
}

impl From<diesel::result::Error> for OutboxRepositoryError {
    fn from(error: diesel::result::Error) -> Self {
        map_diesel_error(error)
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

fn batch_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl OutboxRepository for DieselOutboxRepository {
    async fn enqueue(&self, event: NewOutboxEvent) -> Result<OutboxEvent, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        Self::enqueue_in(&mut conn, &event).await
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        claim_ttl: Duration,
    ) -> Result<Vec<OutboxEvent>, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let now = Utc::now();
        let claim_expiry = now + chrono_duration(claim_ttl);

        let rows: Vec<OutboxEventRow> = diesel::sql_query(CLAIM_BATCH_SQL)
            .bind::<Timestamptz, _>(now)
            .bind::<Timestamptz, _>(now)
            .bind::<BigInt, _>(batch_limit(limit))
            .bind::<Text, _>(worker_id)
            .bind::<Timestamptz, _>(claim_expiry)
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let now = Utc::now();

        // The status filter makes the mark idempotent: a second call finds
        // no unpublished row and leaves the original publish record intact.
        let updated = diesel::update(
            outbox_events::table
                .find(id)
                .filter(outbox_events::status.ne(EventStatus::Published.as_str())),
        )
        .set((
            outbox_events::status.eq(EventStatus::Published.as_str()),
            outbox_events::published_at.eq(Some(now)),
            outbox_events::claimed_by.eq(None::<String>),
            outbox_events::claimed_until.eq(None::<DateTime<Utc>>),
            outbox_events::next_attempt_at.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        if updated > 0 {
            return Ok(());
        }

        let exists: i64 = outbox_events::table
            .find(id)
            .count()
            .get_result(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        if exists == 0 {
            return Err(OutboxRepositoryError::not_found(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<FailureDisposition, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let now = Utc::now();
        let retry = self.retry.clone();
        let reason = reason.to_owned();

        conn.transaction::<FailureDisposition, OutboxRepositoryError, _>(|conn| {
            async move {
                let row: OutboxEventRow = outbox_events::table
                    .find(id)
                    .select(OutboxEventRow::as_select())
                    .first(conn)
                    .await
                    .map_err(|error| match error {
                        diesel::result::Error::NotFound => OutboxRepositoryError::not_found(id),
                        other => map_diesel_error(other),
                    })?;

                let attempt_count = row.attempt_count.saturating_add(1);
                let parked = attempt_count >= retry.max_attempts;
                let (status, next_attempt_at) = if parked {
                    (EventStatus::Failed, None)
                } else {
                    let backoff = chrono_duration(retry.backoff_for(attempt_count));
                    (EventStatus::Pending, Some(now + backoff))
                };

                diesel::update(outbox_events::table.find(id))
                    .set((
                        outbox_events::status.eq(status.as_str()),
                        outbox_events::attempt_count.eq(attempt_count),
                        outbox_events::last_attempt_at.eq(Some(now)),
                        outbox_events::next_attempt_at.eq(next_attempt_at),
                        outbox_events::claimed_by.eq(None::<String>),
                        outbox_events::claimed_until.eq(None::<DateTime<Utc>>),
                        outbox_events::last_error.eq(Some(reason)),
                    ))
                    .execute(conn)
                    .await
                    .map_err(map_diesel_error)?;

                if parked {
                    Ok(FailureDisposition::Parked)
                } else {
                    Ok(FailureDisposition::Retrying { attempt_count })
                }
            }
            .scope_boxed()
        })
        .await
    }

    async fn release_expired_claims(&self) -> Result<u64, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let now = Utc::now();

        let released = diesel::update(
            outbox_events::table.filter(outbox_events::claimed_until.le(now)),
        )
        .set((
            outbox_events::claimed_by.eq(None::<String>),
            outbox_events::claimed_until.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        Ok(released as u64)
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<OutboxEventRow> = outbox_events::table
            .filter(outbox_events::status.eq(EventStatus::Failed.as_str()))
            .order(outbox_events::last_attempt_at.desc())
            .limit(batch_limit(limit))
            .select(OutboxEventRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn requeue_failed(&self, id: Uuid) -> Result<(), OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(
            outbox_events::table
                .find(id)
                .filter(outbox_events::status.eq(EventStatus::Failed.as_str())),
        )
        .set((
            outbox_events::status.eq(EventStatus::Pending.as_str()),
            outbox_events::attempt_count.eq(0),
            outbox_events::next_attempt_at.eq(None::<DateTime<Utc>>),
            outbox_events::last_error.eq(None::<String>),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        if updated == 0 {
            return Err(OutboxRepositoryError::not_found(id));
        }
        debug!(event_id = %id, "requeued failed outbox event");
        Ok(())
    }
}
