//! Real-time inventory reservation engine.
//!
//! Coordinates an Atomic Counter Store (ACS, e.g. Redis) holding the live
//! `reserved` count and expiry index, and a Durable Stock Store (DSS, e.g.
//! Postgres) holding the authoritative `total`, to answer "can this cart
//! hold N units of this SKU right now" atomically, idempotently, and
//! without oversell or leak.

pub mod acs;
pub mod config;
pub mod counter_store;
pub mod dss;
pub mod durable_stock;
pub mod engine;
pub mod error;
pub mod reaper;
pub mod requests;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use acs::{AcsConnectionConfig, AcsPool, RedisCounterStore};
pub use config::EngineConfig;
pub use counter_store::CounterStore;
pub use dss::{PostgresDb, PostgresStock};
pub use durable_stock::DurableStock;
pub use engine::{CommitRetryConfig, ReservationEngine};
pub use error::{EngineError, EngineResult, Error, Result};
pub use reaper::{Reaper, ReaperConfig};
pub use types::{
    CartId, CommitLocalOutcome, CommitOutcome, EventKind, EventRecord, ExtendOutcome,
    ReleaseOutcome, ReleaseReason, ReserveOutcome, Snapshot, SkuId,
};

/// Current version of the reservation engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_available() {
        assert!(!VERSION.is_empty());
    }
}
