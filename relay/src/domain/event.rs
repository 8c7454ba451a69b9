//! Outbox event data model.
//!
//! An [`OutboxEvent`] records one domain fact awaiting delivery to the
//! message broker. Rows are written in the same database transaction as the
//! business-state change they describe, then drained asynchronously by the
//! relay. The relay mutates status and attempt bookkeeping only; the payload
//! is immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery status of an outbox row.
///
/// `Pending` is the initial state. `Published` is terminal and entered only
/// after a confirmed broker acknowledgment. `Failed` is terminal for an
/// attempt cycle: the row exhausted its retry budget and requires manual
/// requeueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Awaiting delivery (includes retry-eligible failures).
    Pending,
    /// Broker acknowledged delivery.
    Published,
    /// Retry budget exhausted; requires operator intervention.
    Failed,
}

impl EventStatus {
    /// Database representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    /// Parse the database representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "published" => Some(Self::Published),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Validation errors raised when constructing a [`NewOutboxEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventValidationError {
    /// The event type must be a non-empty semantic name.
    #[error("event type must not be empty")]
    EmptyEventType,
    /// The destination topic must be non-empty.
    #[error("topic must not be empty")]
    EmptyTopic,
    /// The partition key orders delivery and must be non-empty.
    #[error("partition key must not be empty")]
    EmptyPartitionKey,
}

/// A not-yet-persisted outbox event.
///
/// Produced at the business transaction boundary and handed to the outbox
/// repository for insertion alongside the business write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    /// Kind of business entity that produced the event.
    pub aggregate_type: String,
    /// Identifier of the producing entity.
    pub aggregate_id: String,
    /// Semantic event name, e.g. `ApplicationSubmitted`.
    pub event_type: String,
    /// Serialized event body; immutable once written.
    pub payload: Value,
    /// Destination broker channel.
    pub topic: String,
    /// Ordering key: events sharing a key are delivered in creation order.
    pub partition_key: String,
}

impl NewOutboxEvent {
    /// Validate and build a new outbox event.
    ///
    /// # Errors
    ///
    /// Returns [`EventValidationError`] when the event type, topic, or
    /// partition key is empty after trimming.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        topic: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Result<Self, EventValidationError> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(EventValidationError::EmptyEventType);
        }
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(EventValidationError::EmptyTopic);
        }
        let partition_key = partition_key.into();
        if partition_key.trim().is_empty() {
            return Err(EventValidationError::EmptyPartitionKey);
        }

        Ok(Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type,
            payload,
            topic,
            partition_key,
        })
    }
}

/// A persisted outbox event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    /// Unique identifier, assigned at creation and immutable.
    pub id: Uuid,
    /// Kind of business entity that produced the event.
    pub aggregate_type: String,
    /// Identifier of the producing entity.
    pub aggregate_id: String,
    /// Semantic event name.
    pub event_type: String,
    /// Serialized event body.
    pub payload: Value,
    /// Destination broker channel.
    pub topic: String,
    /// Ordering key for per-key in-order delivery.
    pub partition_key: String,
    /// Current delivery status.
    pub status: EventStatus,
    /// Number of publish attempts so far.
    pub attempt_count: i32,
    /// Instant of the most recent publish attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Row creation instant; defines per-key delivery order.
    pub created_at: DateTime<Utc>,
    /// Instant of the confirmed broker acknowledgment.
    pub published_at: Option<DateTime<Utc>>,
}

/// An inbound event as seen by a consumer.
///
/// The broker delivers at least once, so the same `event_id` can arrive
/// repeatedly; consumers pass envelopes through the duplicate-event detector
/// before applying side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Producer-assigned event identifier used for deduplication.
    pub event_id: Uuid,
    /// Semantic event name.
    pub event_type: String,
    /// Serialized event body.
    pub payload: Value,
}
