//! Integration tests for `DieselOutboxRepository` against embedded PostgreSQL.
//!
//! These tests verify the claim discipline that the unit suite cannot: the
//! `FOR UPDATE SKIP LOCKED` claim query, head-of-line ordering per partition
//! key, and the failure/requeue lifecycle, all against a real database.
//!
//! Each test provisions its own embedded server. When the server cannot be
//! provisioned (no binaries, sandboxed environment) the test skips with a
//! `SKIP-TEST-CLUSTER` marker instead of failing.

use std::time::Duration;

use diesel_async::RunQueryDsl;
use postgresql_embedded::PostgreSQL;
use relay::domain::event::{EventStatus, NewOutboxEvent};
use relay::domain::ports::{FailureDisposition, OutboxRepository, OutboxRepositoryError};
use relay::outbound::persistence::{DbPool, DieselOutboxRepository, PoolConfig, RetryPolicy};
use serde_json::json;

const DATABASE_NAME: &str = "outbox_test";

const CLAIM_TTL: Duration = Duration::from_secs(30);

/// Mirrors the production table. `clock_timestamp()` keeps `created_at`
/// strictly increasing across sequential inserts in one transaction-less
/// test, which the per-key ordering assertions rely on.
const CREATE_OUTBOX_TABLE_SQL: &str = r"
CREATE TABLE outbox_events (
    id UUID PRIMARY KEY,
    aggregate_type VARCHAR NOT NULL,
    aggregate_id VARCHAR NOT NULL,
    event_type VARCHAR NOT NULL,
    payload JSONB NOT NULL,
    topic VARCHAR NOT NULL,
    partition_key VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TIMESTAMPTZ,
    next_attempt_at TIMESTAMPTZ,
    claimed_by VARCHAR,
    claimed_until TIMESTAMPTZ,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
    published_at TIMESTAMPTZ
)
";

struct EmbeddedOutbox {
    pool: DbPool,
    // Dropped last; stops the server.
    _postgresql: PostgreSQL,
}

async fn start_outbox_database() -> Result<EmbeddedOutbox, String> {
    let mut postgresql = PostgreSQL::default();
    postgresql.setup().await.map_err(|err| err.to_string())?;
    postgresql.start().await.map_err(|err| err.to_string())?;
    postgresql
        .create_database(DATABASE_NAME)
        .await
        .map_err(|err| err.to_string())?;
    let database_url = postgresql.settings().url(DATABASE_NAME);

    let pool = DbPool::new(PoolConfig::new(&database_url).with_max_size(2))
        .await
        .map_err(|err| err.to_string())?;
    {
        let mut conn = pool.get().await.map_err(|err| err.to_string())?;
        diesel::sql_query(CREATE_OUTBOX_TABLE_SQL)
            .execute(&mut conn)
            .await
            .map_err(|err| err.to_string())?;
    }

    Ok(EmbeddedOutbox {
        pool,
        _postgresql: postgresql,
    })
}

async fn embedded_outbox(test_name: &str) -> Option<EmbeddedOutbox> {
    match start_outbox_database().await {
        Ok(database) => Some(database),
        Err(reason) => {
            eprintln!("SKIP-TEST-CLUSTER: {test_name} skipped: {reason}");
            None
        }
    }
}

fn sample_event(event_type: &str, partition_key: &str) -> NewOutboxEvent {
    NewOutboxEvent::new(
        "Application",
        partition_key,
        event_type,
        json!({"source": "integration"}),
        "applications",
        partition_key,
    )
    .expect("valid event")
}

#[tokio::test]
async fn claimed_rows_are_invisible_to_a_second_worker() {
    let Some(database) = embedded_outbox("claimed_rows_are_invisible_to_a_second_worker").await
    else {
        return;
    };
    let repository = DieselOutboxRepository::new(database.pool.clone());

    repository
        .enqueue(sample_event("ApplicationSubmitted", "app-1"))
        .await
        .expect("enqueue");
    repository
        .enqueue(sample_event("ApplicationSubmitted", "app-2"))
        .await
        .expect("enqueue");

    let claimed = repository
        .claim_batch("worker-a", 10, CLAIM_TTL)
        .await
        .expect("first claim");
    assert_eq!(claimed.len(), 2);
    assert!(claimed
        .iter()
        .all(|event| event.status == EventStatus::Pending));

    let contested = repository
        .claim_batch("worker-b", 10, CLAIM_TTL)
        .await
        .expect("second claim");
    assert!(
        contested.is_empty(),
        "live claims must hide rows from other workers"
    );
}

#[tokio::test]
async fn claiming_hands_out_only_the_head_of_each_partition_key() {
    let Some(database) =
        embedded_outbox("claiming_hands_out_only_the_head_of_each_partition_key").await
    else {
        return;
    };
    let repository = DieselOutboxRepository::new(database.pool.clone());

    let head = repository
        .enqueue(sample_event("ApplicationSubmitted", "app-1"))
        .await
        .expect("enqueue");
    let second = repository
        .enqueue(sample_event("ApplicationReviewed", "app-1"))
        .await
        .expect("enqueue");
    let other_key = repository
        .enqueue(sample_event("ApplicationSubmitted", "app-2"))
        .await
        .expect("enqueue");

    let claimed = repository
        .claim_batch("worker-a", 10, CLAIM_TTL)
        .await
        .expect("claim");
    let mut claimed_ids: Vec<_> = claimed.iter().map(|event| event.id).collect();
    claimed_ids.sort();
    let mut expected = vec![head.id, other_key.id];
    expected.sort();
    assert_eq!(
        claimed_ids, expected,
        "only the oldest unpublished row per key is claimable"
    );

    // Publishing the head unblocks the next row of its key.
    repository.mark_published(head.id).await.expect("publish");
    let claimed = repository
        .claim_batch("worker-b", 10, CLAIM_TTL)
        .await
        .expect("claim after publish");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, second.id);
}

#[tokio::test]
async fn failed_attempts_retry_then_park_and_requeue() {
    let Some(database) = embedded_outbox("failed_attempts_retry_then_park_and_requeue").await
    else {
        return;
    };
    // Zero backoff keeps the retried row immediately claimable.
    let repository = DieselOutboxRepository::with_retry_policy(
        database.pool.clone(),
        RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        },
    );

    let event = repository
        .enqueue(sample_event("ApplicationSubmitted", "app-1"))
        .await
        .expect("enqueue");

    let claimed = repository
        .claim_batch("worker-a", 10, CLAIM_TTL)
        .await
        .expect("claim");
    assert_eq!(claimed.len(), 1);

    let disposition = repository
        .mark_failed(event.id, "connection reset")
        .await
        .expect("first failure");
    assert_eq!(disposition, FailureDisposition::Retrying { attempt_count: 1 });

    // The failure released the claim, so the retry is claimable at once.
    let claimed = repository
        .claim_batch("worker-a", 10, CLAIM_TTL)
        .await
        .expect("reclaim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempt_count, 1);

    let disposition = repository
        .mark_failed(event.id, "connection reset")
        .await
        .expect("second failure");
    assert_eq!(disposition, FailureDisposition::Parked);

    let parked = repository.list_failed(10).await.expect("list failed");
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].id, event.id);
    assert_eq!(parked[0].status, EventStatus::Failed);
    assert!(
        repository
            .claim_batch("worker-a", 10, CLAIM_TTL)
            .await
            .expect("claim parked")
            .is_empty(),
        "parked rows are out of the claim pool"
    );

    repository.requeue_failed(event.id).await.expect("requeue");
    let claimed = repository
        .claim_batch("worker-a", 10, CLAIM_TTL)
        .await
        .expect("claim requeued");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempt_count, 0, "requeue resets the budget");
}

#[tokio::test]
async fn mark_published_is_idempotent_against_the_database() {
    let Some(database) =
        embedded_outbox("mark_published_is_idempotent_against_the_database").await
    else {
        return;
    };
    let repository = DieselOutboxRepository::new(database.pool.clone());

    let event = repository
        .enqueue(sample_event("ApplicationSubmitted", "app-1"))
        .await
        .expect("enqueue");

    repository.mark_published(event.id).await.expect("first mark");
    repository
        .mark_published(event.id)
        .await
        .expect("repeat mark is accepted");
    assert!(
        repository
            .claim_batch("worker-a", 10, CLAIM_TTL)
            .await
            .expect("claim")
            .is_empty(),
        "published rows never re-enter the claim pool"
    );

    let missing = repository.mark_published(uuid::Uuid::new_v4()).await;
    assert!(matches!(
        missing,
        Err(OutboxRepositoryError::NotFound { .. })
    ));
}
