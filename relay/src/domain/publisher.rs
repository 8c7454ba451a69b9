//! Breaker-guarded, timeout-bounded publish decoration.
//!
//! [`GuardedPublisher`] wraps any [`EventPublisher`] with the circuit
//! breaker and an explicit acknowledgment deadline. The guard is ordinary
//! composition, not interception: the relay depends on the port and the
//! wiring decides what sits behind it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockable::Clock;
use tracing::{debug, info};

use crate::domain::circuit_breaker::{BreakerTransition, CallAdmission, CircuitBreaker};
use crate::domain::event::OutboxEvent;
use crate::domain::ports::{BrokerAck, EventPublishError, EventPublisher, GuardMetrics};

/// Default bound on the synchronous wait for a broker acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Publish decorator applying the circuit breaker and ack timeout.
///
/// A timeout or broker error counts as a failure both for the breaker and
/// for the caller. A send that times out may still land broker-side, so the
/// caller must leave the outbox row unpublished and rely on consumer-side
/// dedup to absorb the possible second copy.
pub struct GuardedPublisher {
    inner: Arc<dyn EventPublisher>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<dyn GuardMetrics>,
    clock: Arc<dyn Clock>,
    ack_timeout: Duration,
}

impl GuardedPublisher {
    /// Wrap `inner` with `breaker` and the default ack timeout.
    pub fn new(
        inner: Arc<dyn EventPublisher>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<dyn GuardMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_ack_timeout(inner, breaker, metrics, clock, DEFAULT_ACK_TIMEOUT)
    }

    /// Wrap `inner` with `breaker` and an explicit ack timeout.
    pub fn with_ack_timeout(
        inner: Arc<dyn EventPublisher>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<dyn GuardMetrics>,
        clock: Arc<dyn Clock>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            breaker,
            metrics,
            clock,
            ack_timeout,
        }
    }

    async fn note_transition(&self, transition: Option<BreakerTransition>) {
        let Some(transition) = transition else {
            return;
        };
        info!(
            breaker = self.breaker.name(),
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            "circuit breaker transition"
        );
        // Exporter failures must not disturb the publish path.
        let _ = self
            .metrics
            .record_breaker_transition(self.breaker.name(), transition.from, transition.to)
            .await;
    }
}

#[async_trait]
impl EventPublisher for GuardedPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<BrokerAck, EventPublishError> {
        let (admission, transition) = self.breaker.admit_call(self.clock.utc());
        self.note_transition(transition).await;
        if admission == CallAdmission::FailFast {
            return Err(EventPublishError::circuit_open(self.breaker.name()));
        }

        let outcome = tokio::time::timeout(self.ack_timeout, self.inner.publish(event)).await;
        match outcome {
            Ok(Ok(ack)) => {
                let transition = self.breaker.record_success(self.clock.utc());
                self.note_transition(transition).await;
                debug!(
                    event_id = %event.id,
                    topic = %event.topic,
                    partition = ack.partition,
                    offset = ack.offset,
                    "broker confirmed delivery"
                );
                Ok(ack)
            }
            Ok(Err(error)) => {
                let transition = self.breaker.record_failure(self.clock.utc());
                self.note_transition(transition).await;
                Err(error)
            }
            Err(_elapsed) => {
                let transition = self.breaker.record_failure(self.clock.utc());
                self.note_transition(transition).await;
                Err(EventPublishError::timeout(format!(
                    "no acknowledgment within {}ms",
                    self.ack_timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit_breaker::{BreakerState, CircuitBreakerConfig};
    use crate::domain::event::EventStatus;
    use crate::domain::ports::NoOpGuardMetrics;
    use crate::domain::ports::MockGuardMetrics;
    use crate::test_support::{test_instant, MutableClock};
    use rstest::{fixture, rstest};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    fn event() -> OutboxEvent {
        OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_type: "Application".to_owned(),
            aggregate_id: "app-1".to_owned(),
            event_type: "ApplicationSubmitted".to_owned(),
            payload: json!({}),
            topic: "applications".to_owned(),
            partition_key: "app-1".to_owned(),
            status: EventStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            created_at: test_instant(),
            published_at: None,
        }
    }

    /// Scripted publisher returning canned outcomes and counting calls.
    struct ScriptedPublisher {
        outcomes: Mutex<Vec<Result<BrokerAck, EventPublishError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedPublisher {
        fn new(outcomes: Vec<Result<BrokerAck, EventPublishError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventPublisher for ScriptedPublisher {
        async fn publish(&self, _event: &OutboxEvent) -> Result<BrokerAck, EventPublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().expect("outcomes mutex");
            if outcomes.is_empty() {
                Ok(BrokerAck {
                    partition: 0,
                    offset: 0,
                })
            } else {
                outcomes.remove(0)
            }
        }
    }

    /// Publisher that never acknowledges within any deadline.
    struct StalledPublisher;

    #[async_trait]
    impl EventPublisher for StalledPublisher {
        async fn publish(&self, _event: &OutboxEvent) -> Result<BrokerAck, EventPublishError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(BrokerAck {
                partition: 0,
                offset: 0,
            })
        }
    }

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        Arc::new(MutableClock::new(test_instant()))
    }

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            evaluation_window: Duration::from_secs(60),
            open_cooldown: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }

    fn guarded(
        inner: Arc<dyn EventPublisher>,
        clock: Arc<MutableClock>,
    ) -> (GuardedPublisher, Arc<CircuitBreaker>) {
        let breaker = Arc::new(CircuitBreaker::new(
            "broker-publish",
            breaker_config(),
            test_instant(),
        ));
        let publisher = GuardedPublisher::with_ack_timeout(
            inner,
            Arc::clone(&breaker),
            Arc::new(NoOpGuardMetrics),
            clock,
            Duration::from_secs(10),
        );
        (publisher, breaker)
    }

    #[rstest]
    #[tokio::test]
    async fn ack_passes_through_on_success(clock: Arc<MutableClock>) {
        let inner = Arc::new(ScriptedPublisher::new(vec![Ok(BrokerAck {
            partition: 3,
            offset: 41,
        })]));
        let (publisher, breaker) = guarded(Arc::clone(&inner) as Arc<dyn EventPublisher>, clock);

        let ack = publisher.publish(&event()).await.expect("ack");
        assert_eq!(ack.partition, 3);
        assert_eq!(ack.offset, 41);
        assert_eq!(inner.calls(), 1);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out_and_counts_as_failure(clock: Arc<MutableClock>) {
        let (publisher, breaker) = guarded(Arc::new(StalledPublisher), clock);

        let error = publisher.publish(&event()).await.expect_err("timeout");
        assert!(matches!(error, EventPublishError::Timeout { .. }));
        assert!(error.is_retryable());

        // One more failure reaches the threshold and opens the breaker.
        let _ = publisher.publish(&event()).await.expect_err("timeout");
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[rstest]
    #[tokio::test]
    async fn open_breaker_fails_fast_without_calling_the_broker(clock: Arc<MutableClock>) {
        let inner = Arc::new(ScriptedPublisher::new(vec![
            Err(EventPublishError::transport("reset")),
            Err(EventPublishError::transport("reset")),
        ]));
        let (publisher, breaker) = guarded(Arc::clone(&inner) as Arc<dyn EventPublisher>, clock);

        let _ = publisher.publish(&event()).await.expect_err("failure 1");
        let _ = publisher.publish(&event()).await.expect_err("failure 2");
        assert_eq!(breaker.state(), BreakerState::Open);

        let error = publisher.publish(&event()).await.expect_err("fail fast");
        assert!(matches!(error, EventPublishError::CircuitOpen { .. }));
        assert_eq!(inner.calls(), 2, "open breaker must not reach the broker");
    }

    #[rstest]
    #[tokio::test]
    async fn half_open_probe_success_recloses_the_breaker(clock: Arc<MutableClock>) {
        let inner = Arc::new(ScriptedPublisher::new(vec![
            Err(EventPublishError::transport("reset")),
            Err(EventPublishError::transport("reset")),
            Ok(BrokerAck {
                partition: 0,
                offset: 7,
            }),
        ]));
        let (publisher, breaker) =
            guarded(Arc::clone(&inner) as Arc<dyn EventPublisher>, Arc::clone(&clock));

        let _ = publisher.publish(&event()).await.expect_err("failure 1");
        let _ = publisher.publish(&event()).await.expect_err("failure 2");
        assert_eq!(breaker.state(), BreakerState::Open);

        clock.advance(Duration::from_secs(31));
        let ack = publisher.publish(&event()).await.expect("probe succeeds");
        assert_eq!(ack.offset, 7);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[rstest]
    #[tokio::test]
    async fn transitions_are_exported_for_alerting(clock: Arc<MutableClock>) {
        let mut metrics = MockGuardMetrics::new();
        metrics
            .expect_record_breaker_transition()
            .withf(|name, from, to| {
                name == "broker-publish"
                    && *from == BreakerState::Closed
                    && *to == BreakerState::Open
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let breaker = Arc::new(CircuitBreaker::new(
            "broker-publish",
            breaker_config(),
            test_instant(),
        ));
        let publisher = GuardedPublisher::with_ack_timeout(
            Arc::new(ScriptedPublisher::new(vec![
                Err(EventPublishError::transport("reset")),
                Err(EventPublishError::transport("reset")),
            ])),
            breaker,
            Arc::new(metrics),
            clock,
            Duration::from_secs(10),
        );

        let _ = publisher.publish(&event()).await.expect_err("failure 1");
        let _ = publisher.publish(&event()).await.expect_err("failure 2");
    }
}
