//! The `DurableStock` capability — the Durable Stock Store (DSS)'s
//! authoritative `total` column, accessed through narrow typed operations
//! rather than a shared transaction handle.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::SkuId;

/// The DSS's operation surface as the engine needs it. `total` is owned
/// exclusively by the DSS (I6); the engine never writes it except through
/// [`DurableStock::conditional_decrement`] during commit.
#[async_trait]
pub trait DurableStock: Send + Sync {
    /// `UPDATE inventory SET total = total - qty WHERE sku = ? AND total >= qty
    /// RETURNING total`. The read of the post-decrement total must be atomic
    /// with the decrement itself — a separate follow-up read would let a
    /// concurrent commit against the same SKU (from a different cart, which
    /// the ACS does not serialize against) race in between and make the
    /// reported total reflect someone else's decrement. Returns `Some(new_total)`
    /// iff a row was updated, `None` if the decrement was rejected (insufficient
    /// stock or unknown SKU).
    async fn conditional_decrement(&self, sku: &SkuId, qty: i64) -> EngineResult<Option<i64>>;

    /// Current authoritative `total`, or `None` if the SKU is unknown.
    async fn get_total(&self, sku: &SkuId) -> EngineResult<Option<i64>>;

    /// Administrative seed/top-up, used by demos and tests to establish a
    /// starting `total` before the reservation protocol runs. Not part of
    /// the reservation protocol itself.
    async fn seed_total(&self, sku: &SkuId, total: i64) -> EngineResult<()>;

    /// Shallow connectivity check.
    async fn health_check(&self) -> EngineResult<()>;
}
