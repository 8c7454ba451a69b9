//! Placeholder for the real broker publisher adapter.
//!
//! This module provides a stub implementation of the `EventPublisher` port
//! that acknowledges every event without a broker round trip. It keeps the
//! relay runnable end to end until the concrete broker client lands.
//!
//! # Future Implementation
//!
//! The full adapter will:
//! - Hold a producer client for the message broker
//! - Map the event's `partition_key` onto the broker's partitioner
//! - Return the broker-assigned partition and offset in the ack
//! - Surface transport and rejection failures as `EventPublishError`

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::warn;

use crate::domain::event::OutboxEvent;
use crate::domain::ports::{BrokerAck, EventPublishError, EventPublisher};

/// Stub publisher that acknowledges everything it is handed.
///
/// Each ack carries a synthetic monotonically increasing offset so callers
/// exercising the full relay path see distinct, plausible acks.
#[derive(Debug, Default)]
pub struct StubEventPublisher {
    next_offset: AtomicI64,
}

impl StubEventPublisher {
    /// Create a new stub publisher.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventPublisher for StubEventPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<BrokerAck, EventPublishError> {
        warn!(
            event_id = %event.id,
            topic = %event.topic,
            "stub publisher acknowledged event without a broker round trip"
        );
        Ok(BrokerAck {
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        })
    }
}
