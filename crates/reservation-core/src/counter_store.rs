//! The `CounterStore` capability — the atomic surface the Atomic Counter
//! Store (ACS) exposes to the engine.
//!
//! Modeled as a narrow typed trait rather than a shared transaction, per
//! the re-architecture notes: the engine never issues ad-hoc commands
//! against the ACS, only these five named, atomic operations plus the two
//! read-only helpers the Reaper and `events` op need.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{
    CartId, CommitLocalOutcome, EventRecord, ExtendOutcome, ReleaseOutcome, ReleaseReason,
    ReserveOutcome, Snapshot, SkuId,
};

/// The ACS's atomic operation surface. Every method here must execute as
/// a single atomic unit against the keys it touches — no interleaving with
/// any other `CounterStore` call on the same `(cart, sku)` — to preserve
/// invariants I2–I5. Implementations must never emulate this with
/// client-side compare-and-set loops.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// `RESERVE(sku, cart_id, qty, ttl_ms, now_ms)`.
    async fn reserve(
        &self,
        sku: &SkuId,
        cart: &CartId,
        qty: i64,
        ttl_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ReserveOutcome>;

    /// `EXTEND(sku, cart_id, add_ms, now_ms)`.
    async fn extend(
        &self,
        sku: &SkuId,
        cart: &CartId,
        add_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ExtendOutcome>;

    /// `COMMIT_LOCAL(sku, cart_id)`. Does not touch `total`.
    async fn commit_local(&self, sku: &SkuId, cart: &CartId) -> EngineResult<CommitLocalOutcome>;

    /// `RELEASE(sku, cart_id)`, idempotent.
    async fn release(
        &self,
        sku: &SkuId,
        cart: &CartId,
        reason: ReleaseReason,
    ) -> EngineResult<ReleaseOutcome>;

    /// Read-only snapshot of `{total, reserved, available}` for a SKU.
    /// Not scripted; may be momentarily stale relative to an in-flight
    /// script execution.
    async fn snapshot(&self, sku: &SkuId) -> EngineResult<Snapshot>;

    /// Read-only lookup of the `qty` held by `(cart, sku)`, without
    /// mutating anything. Used by commit's step 1 ("look up hold in ACS
    /// without mutation"); a plain `HGET`, never a script.
    async fn peek_hold(&self, sku: &SkuId, cart: &CartId) -> EngineResult<Option<i64>>;

    /// Holds whose `expires_at <= now_ms`, in ascending expiry order,
    /// bounded to `batch` entries. Used exclusively by the Reaper; the
    /// sweep itself is not atomic, only each subsequent `release` call is.
    async fn due_holds(&self, now_ms: i64, batch: usize) -> EngineResult<Vec<(CartId, SkuId)>>;

    /// Last `limit` entries from the Event Log, most recent last.
    async fn events(&self, limit: usize) -> EngineResult<Vec<EventRecord>>;

    /// Shallow connectivity check.
    async fn health_check(&self) -> EngineResult<()>;
}
