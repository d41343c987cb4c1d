//! Durable Stock Store: the Postgres-backed implementation of [`crate::durable_stock::DurableStock`].

pub mod postgres_store;

pub use postgres_store::{create_pool, run_migrations, PostgresDb, PostgresStock};
