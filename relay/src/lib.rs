//! Reliable cross-service event delivery.
//!
//! This crate is the event-delivery core of a multi-service backend: a
//! transactional outbox with a polling relay, a broker publish path guarded
//! by a circuit breaker, a consumer-side duplicate-event detector, and a
//! windowed rate limiter for hot write paths. The surrounding application
//! (HTTP routing, authentication, entity CRUD) is an external collaborator
//! reached only through the ports in [`domain::ports`].

pub mod domain;
pub mod outbound;

#[cfg(test)]
pub(crate) mod test_support;
