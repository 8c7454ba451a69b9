//! PostgreSQL persistence for the outbox.
//!
//! The Diesel schema and row models live beside the repository adapter so
//! the mapping between database rows and domain events stays in one place.

mod diesel_outbox_repository;
mod models;
mod pool;
mod schema;

pub use diesel_outbox_repository::{DieselOutboxRepository, RetryPolicy};
pub use pool::{DbPool, PoolConfig, PoolError};
