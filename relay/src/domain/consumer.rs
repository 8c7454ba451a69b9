//! Inbound event processing with idempotency.
//!
//! Composes the duplicate-event detector with a handler port: the detector
//! gates side effects, the handler applies them, and successful completion
//! is confirmed back to the seen set. Duplicate delivery is a normal
//! branch, not an error.

use std::sync::Arc;

use tracing::debug;

use crate::domain::dedup::{DuplicateEventDetector, EventNovelty};
use crate::domain::event::EventEnvelope;
use crate::domain::ports::{EventHandler, EventHandlerError};

/// Outcome of processing one inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event was new; side effects were applied.
    Processed,
    /// The event id was already seen; side effects were skipped.
    SkippedDuplicate,
}

/// Idempotent consumer pipeline for inbound events.
pub struct InboundEventProcessor {
    detector: Arc<DuplicateEventDetector>,
    handler: Arc<dyn EventHandler>,
}

impl InboundEventProcessor {
    /// Build a processor over the detector and handler.
    pub fn new(detector: Arc<DuplicateEventDetector>, handler: Arc<dyn EventHandler>) -> Self {
        Self { detector, handler }
    }

    /// Process one inbound envelope.
    ///
    /// Duplicates short-circuit before the handler runs. Handler failures
    /// propagate to the transport's redelivery machinery; the seen-set
    /// entry written by the gate is released first, so the redelivery is
    /// classified as new and the side effects get another attempt.
    ///
    /// # Errors
    ///
    /// Returns the handler's error when side effects could not be applied.
    pub async fn process(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<ProcessOutcome, EventHandlerError> {
        match self.detector.is_new_event(envelope.event_id).await {
            EventNovelty::Duplicate => {
                debug!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    "skipping duplicate delivery"
                );
                Ok(ProcessOutcome::SkippedDuplicate)
            }
            EventNovelty::New => {
                if let Err(error) = self.handler.handle(envelope).await {
                    self.detector.forget(envelope.event_id).await;
                    return Err(error);
                }
                self.detector.mark_processed(envelope.event_id).await;
                Ok(ProcessOutcome::Processed)
            }
        }
    }
}
