//! Outbound adapters implementing the domain ports.
//!
//! Persistence (PostgreSQL via Diesel) backs the outbox repository,
//! key-value storage (Redis via bb8) backs the expiry store used by the
//! duplicate-event detector and the rate limiter, and the broker module
//! holds the publisher adapter.

pub mod broker;
pub mod keyvalue;
pub mod persistence;
