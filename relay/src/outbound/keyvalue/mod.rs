//! Key-value adapters for the expiry store port.
//!
//! [`RedisExpiryStore`] is the production adapter; [`InMemoryExpiryStore`]
//! is a clock-driven implementation used by tests and local runs without a
//! Redis backend.

mod in_memory;
mod redis_expiry_store;

pub use in_memory::InMemoryExpiryStore;
pub use redis_expiry_store::RedisExpiryStore;
