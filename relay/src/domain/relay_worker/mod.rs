//! Outbox relay worker.
//!
//! The relay drains the outbox into the broker: claim a bounded batch,
//! publish each partition-key group in creation order (groups run
//! concurrently), and resolve every row as published or failed. Workers are
//! mutually unaware; the repository's exclusive-claim discipline keeps them
//! off each other's rows, and claim expiry lets a survivor take over a
//! crashed worker's batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::event::OutboxEvent;
use crate::domain::ports::{
    DeliveryMetrics, EventPublishError, EventPublisher, FailureDisposition, OutboxRepository,
    OutboxRepositoryError,
};

mod runtime;

pub use runtime::{OutboxRelayPorts, Sleeper, TokioSleeper};

/// Relay worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Identity stamped on claims, for diagnostics and claim audits.
    pub worker_id: String,
    /// Maximum rows claimed per cycle.
    pub batch_size: usize,
    /// Explicit wait between cycles.
    pub poll_interval: Duration,
    /// Claim lifetime; an expired claim is released for other workers.
    pub claim_ttl: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("relay-{}", Uuid::new_v4()),
            batch_size: 50,
            poll_interval: Duration::from_secs(1),
            claim_ttl: Duration::from_secs(30),
        }
    }
}

/// Outcome summary of one claim-publish-mark cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSummary {
    /// Expired claims released before claiming.
    pub released_claims: u64,
    /// Rows claimed this cycle.
    pub claimed: usize,
    /// Rows confirmed published.
    pub published: usize,
    /// Rows that recorded a failed attempt.
    pub failed: usize,
}

/// Polling relay draining the outbox through the publish path.
///
/// The publisher handed in here is normally a
/// [`crate::domain::publisher::GuardedPublisher`], so every send is breaker
/// guarded and timeout bounded.
pub struct OutboxRelay {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<dyn DeliveryMetrics>,
    sleeper: Arc<dyn Sleeper>,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Build a relay with the default tokio sleeper.
    pub fn new(ports: OutboxRelayPorts, config: RelayConfig) -> Self {
        Self::with_sleeper(ports, Arc::new(TokioSleeper), config)
    }

    /// Build a relay with an injected sleeper.
    pub fn with_sleeper(
        ports: OutboxRelayPorts,
        sleeper: Arc<dyn Sleeper>,
        config: RelayConfig,
    ) -> Self {
        Self {
            repository: ports.repository,
            publisher: ports.publisher,
            metrics: ports.metrics,
            sleeper,
            config,
        }
    }

    /// Run cycles until `shutdown` flips to `true`.
    ///
    /// Cycle errors are logged and absorbed; the next poll retries. The
    /// wait between cycles is an explicit sleep, not busy-polling.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.config.worker_id, "outbox relay started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle().await {
                Ok(summary) if summary.claimed > 0 => {
                    debug!(
                        claimed = summary.claimed,
                        published = summary.published,
                        failed = summary.failed,
                        "relay cycle complete"
                    );
                }
                Ok(_) => {}
                Err(cycle_error) => {
                    warn!(error = %cycle_error, "relay cycle failed; retrying next poll");
                }
            }

            tokio::select! {
                () = self.sleeper.sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    // A closed channel can never signal; treat it as a stop
                    // rather than spinning on the dead receiver.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(worker_id = %self.config.worker_id, "outbox relay stopped");
    }

    /// Execute one claim-publish-mark cycle.
    ///
    /// # Errors
    ///
    /// Returns repository errors from the release and claim phases; publish
    /// failures are absorbed into the summary, not surfaced here.
    pub async fn run_cycle(&self) -> Result<CycleSummary, OutboxRepositoryError> {
        let released_claims = self.repository.release_expired_claims().await?;
        if released_claims > 0 {
            warn!(released_claims, "released expired outbox claims");
        }

        let batch = self
            .repository
            .claim_batch(
                &self.config.worker_id,
                self.config.batch_size,
                self.config.claim_ttl,
            )
            .await?;
        let claimed = batch.len();

        let groups = group_by_partition_key(batch);
        let outcomes = join_all(groups.into_iter().map(|group| self.publish_group(group))).await;

        let (published, failed) = outcomes
            .into_iter()
            .fold((0, 0), |(published, failed), (p, f)| {
                (published + p, failed + f)
            });

        Ok(CycleSummary {
            released_claims,
            claimed,
            published,
            failed,
        })
    }

    /// Publish one partition-key group in creation order.
    ///
    /// The first failure stops the group: later rows with the same key must
    /// not overtake the failed one. Their claims lapse and a later cycle
    /// retries the key from the failed row onward.
    async fn publish_group(&self, group: Vec<OutboxEvent>) -> (usize, usize) {
        let mut published = 0;
        let mut failed = 0;

        for event in group {
            match self.publisher.publish(&event).await {
                Ok(ack) => {
                    debug!(
                        event_id = %event.id,
                        topic = %event.topic,
                        partition = ack.partition,
                        offset = ack.offset,
                        "event delivered"
                    );
                    let _ = self.metrics.record_published(&event.topic).await;
                    if let Err(mark_error) = self.repository.mark_published(event.id).await {
                        // The broker has the event; the row will be
                        // re-published on a later claim and consumer dedup
                        // absorbs the duplicate.
                        warn!(
                            event_id = %event.id,
                            error = %mark_error,
                            "failed to mark event published"
                        );
                    }
                    published += 1;
                }
                Err(EventPublishError::CircuitOpen { breaker }) => {
                    // A fail-fast rejection is not a broker attempt: the row
                    // keeps its retry budget, its claim lapses, and a later
                    // cycle retries once the breaker admits calls again.
                    debug!(
                        event_id = %event.id,
                        topic = %event.topic,
                        breaker = %breaker,
                        "publish deferred while the circuit is open"
                    );
                    break;
                }
                Err(publish_error) => {
                    let _ = self
                        .metrics
                        .record_publish_error(&event.topic, &event.event_type)
                        .await;
                    self.record_failed_attempt(&event, &publish_error.to_string())
                        .await;
                    failed += 1;
                    break;
                }
            }
        }

        (published, failed)
    }

    async fn record_failed_attempt(&self, event: &OutboxEvent, reason: &str) {
        match self.repository.mark_failed(event.id, reason).await {
            Ok(FailureDisposition::Retrying { attempt_count }) => {
                warn!(
                    event_id = %event.id,
                    topic = %event.topic,
                    attempt_count,
                    reason,
                    "publish attempt failed; will retry"
                );
            }
            Ok(FailureDisposition::Parked) => {
                error!(
                    event_id = %event.id,
                    topic = %event.topic,
                    event_type = %event.event_type,
                    reason,
                    "retry budget exhausted; event parked for manual requeue"
                );
                let _ = self
                    .metrics
                    .record_terminal_failure(&event.topic, &event.event_type)
                    .await;
            }
            Err(mark_error) => {
                warn!(
                    event_id = %event.id,
                    error = %mark_error,
                    "failed to record publish failure"
                );
            }
        }
    }
}

/// Group a claimed batch by partition key, preserving creation order within
/// each group. Group-to-group order carries no guarantee.
fn group_by_partition_key(batch: Vec<OutboxEvent>) -> Vec<Vec<OutboxEvent>> {
    let mut groups: HashMap<String, Vec<OutboxEvent>> = HashMap::new();
    for event in batch {
        groups
            .entry(event.partition_key.clone())
            .or_default()
            .push(event);
    }
    groups.into_values().collect()
}
