//! Runtime wiring for the relay worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ports::{DeliveryMetrics, EventPublisher, OutboxRepository};

/// Ports the relay depends on, bundled for construction.
pub struct OutboxRelayPorts {
    pub repository: Arc<dyn OutboxRepository>,
    pub publisher: Arc<dyn EventPublisher>,
    pub metrics: Arc<dyn DeliveryMetrics>,
}

/// Abstraction over the inter-cycle wait so tests can skip real time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
