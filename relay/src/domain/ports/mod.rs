//! Domain ports for the hexagonal boundary.
//!
//! Each port is an async trait implemented by an outbound adapter. Ports
//! carry their own `thiserror` error enums so callers can branch on failure
//! category without depending on adapter internals.

mod delivery_metrics;
mod event_handler;
mod event_publisher;
mod expiry_store;
mod guard_metrics;
mod outbox_repository;

#[cfg(test)]
pub use delivery_metrics::MockDeliveryMetrics;
pub use delivery_metrics::{DeliveryMetrics, DeliveryMetricsError, NoOpDeliveryMetrics};
#[cfg(test)]
pub use event_handler::MockEventHandler;
pub use event_handler::{EventHandler, EventHandlerError};
#[cfg(test)]
pub use event_publisher::MockEventPublisher;
pub use event_publisher::{BrokerAck, EventPublishError, EventPublisher};
#[cfg(test)]
pub use expiry_store::MockExpiryStore;
pub use expiry_store::{ExpiryStore, ExpiryStoreError, FixtureExpiryStore};
#[cfg(test)]
pub use guard_metrics::MockGuardMetrics;
pub use guard_metrics::{GuardMetrics, GuardMetricsError, NoOpGuardMetrics};
#[cfg(test)]
pub use outbox_repository::MockOutboxRepository;
pub use outbox_repository::{FailureDisposition, OutboxRepository, OutboxRepositoryError};
