//! Domain types and services for reliable event delivery.
//!
//! The domain owns the outbox data model, the relay worker, the circuit
//! breaker, the duplicate-event detector, and the rate limiter. Everything
//! infrastructural (Postgres, Redis, the broker) is reached through the
//! traits in [`ports`].

pub mod circuit_breaker;
pub mod consumer;
pub mod dedup;
pub mod event;
pub mod ports;
pub mod publisher;
pub mod rate_limit;
pub mod relay_worker;

pub use circuit_breaker::{
    BreakerState, BreakerTransition, CallAdmission, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerRegistry,
};
pub use consumer::{InboundEventProcessor, ProcessOutcome};
pub use dedup::{DedupConfig, DuplicateEventDetector, EventNovelty, StoreOutagePolicy};
pub use event::{EventEnvelope, EventStatus, EventValidationError, NewOutboxEvent, OutboxEvent};
pub use publisher::GuardedPublisher;
pub use rate_limit::{RateLimitQuota, RateLimiter};
pub use relay_worker::{
    CycleSummary, OutboxRelay, OutboxRelayPorts, RelayConfig, Sleeper, TokioSleeper,
};
