//! Atomic Counter Store: the Redis-backed implementation of [`crate::counter_store::CounterStore`].

pub mod connection;
pub mod keys;
pub mod redis_store;
pub mod scripts;

pub use connection::{AcsConnectionConfig, AcsPool};
pub use redis_store::RedisCounterStore;
