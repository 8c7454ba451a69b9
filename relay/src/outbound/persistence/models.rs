//! Row models mapping the outbox table to domain events.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::event::{EventStatus, OutboxEvent};
use crate::domain::ports::OutboxRepositoryError;

use super::schema::outbox_events;

/// A full outbox row as stored in PostgreSQL.
///
/// Carries the claim and scheduling columns the domain event does not
/// expose; those stay adapter-internal.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEventRow {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub topic: String,
    pub partition_key: String,
    pub status: String,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Insertable form of a new pending outbox row.
#[derive(Debug, Insertable)]
#[diesel(table_name = outbox_events)]
pub struct NewOutboxEventRow<'a> {
    pub id: Uuid,
    pub aggregate_type: &'a str,
    pub aggregate_id: &'a str,
    pub event_type: &'a str,
    pub payload: &'a Value,
    pub topic: &'a str,
    pub partition_key: &'a str,
    pub status: &'a str,
}

/// Convert a database row to the domain event.
///
/// # Errors
///
/// Returns a query error when the stored status string is not a known
/// [`EventStatus`], which indicates row corruption or schema drift.
pub fn row_to_event(row: OutboxEventRow) -> Result<OutboxEvent, OutboxRepositoryError> {
    let status = EventStatus::parse(&row.status).ok_or_else(|| {
        OutboxRepositoryError::query(format!("unknown outbox status in database: {}", row.status))
    })?;

    Ok(OutboxEvent {
        id: row.id,
        aggregate_type: row.aggregate_type,
        aggregate_id: row.aggregate_id,
        event_type: row.event_type,
        payload: row.payload,
        topic: row.topic,
        partition_key: row.partition_key,
        status,
        attempt_count: row.attempt_count,
        last_attempt_at: row.last_attempt_at,
        created_at: row.created_at,
        published_at: row.published_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn sample_row(status: &str) -> OutboxEventRow {
        OutboxEventRow {
            id: Uuid::new_v4(),
            aggregate_type: "Application".to_owned(),
            aggregate_id: "app-1".to_owned(),
            event_type: "ApplicationSubmitted".to_owned(),
            payload: json!({"applicant": "a-1"}),
            topic: "applications".to_owned(),
            partition_key: "app-1".to_owned(),
            status: status.to_owned(),
            attempt_count: 2,
            last_attempt_at: None,
            next_attempt_at: None,
            claimed_by: None,
            claimed_until: None,
            last_error: None,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    #[rstest]
    fn known_status_converts_to_domain_event(#[values("pending", "published", "failed")] status: &str) {
        let event = row_to_event(sample_row(status)).expect("valid row");
        assert_eq!(event.status.as_str(), status);
        assert_eq!(event.attempt_count, 2);
    }

    #[rstest]
    fn unknown_status_is_reported_as_corruption() {
        let result = row_to_event(sample_row("shipped"));
        let error = result.expect_err("unknown status");
        assert!(error.to_string().contains("shipped"));
    }
}
