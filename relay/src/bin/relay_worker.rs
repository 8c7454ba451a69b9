//! Relay worker entry-point: wires the outbox repository, the guarded
//! publisher, and the polling relay, then runs until interrupted.

use std::env;
use std::sync::Arc;

use color_eyre::eyre::{eyre, WrapErr};
use mockable::{Clock, DefaultClock};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use relay::domain::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use relay::domain::ports::NoOpDeliveryMetrics;
use relay::domain::ports::NoOpGuardMetrics;
use relay::domain::{GuardedPublisher, OutboxRelay, OutboxRelayPorts, RelayConfig};
use relay::outbound::broker::StubEventPublisher;
use relay::outbound::persistence::{DbPool, DieselOutboxRepository, PoolConfig};

/// Worker bootstrap.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| eyre!("DATABASE_URL must be set to the outbox database"))?;

    let pool = DbPool::new(PoolConfig::new(database_url))
        .await
        .wrap_err("failed to build the database pool")?;
    let repository = Arc::new(DieselOutboxRepository::new(pool));

    let clock = Arc::new(DefaultClock);
    let breaker = Arc::new(CircuitBreaker::new(
        "broker-publish",
        CircuitBreakerConfig::default(),
        clock.utc(),
    ));
    let publisher = Arc::new(GuardedPublisher::new(
        Arc::new(StubEventPublisher::new()),
        breaker,
        Arc::new(NoOpGuardMetrics),
        clock,
    ));

    let config = RelayConfig::default();
    info!(worker_id = %config.worker_id, "starting outbox relay worker");
    let relay = OutboxRelay::new(
        OutboxRelayPorts {
            repository,
            publisher,
            metrics: Arc::new(NoOpDeliveryMetrics),
        },
        config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    relay.run(shutdown_rx).await;
    Ok(())
}
