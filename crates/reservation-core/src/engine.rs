//! `ReservationEngine`: the orchestration layer tying the ACS
//! ([`CounterStore`]) and DSS ([`DurableStock`]) together behind the six
//! operations the rest of the system calls — `reserve`, `extend`, `commit`,
//! `release`, `snapshot`, `events`. The engine holds no locks of its own;
//! all mutual exclusion is delegated to the ACS's script serialization.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::counter_store::CounterStore;
use crate::durable_stock::DurableStock;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    CartId, CommitOutcome, EventRecord, ExtendOutcome, ReleaseOutcome, ReleaseReason,
    ReserveOutcome, Snapshot, SkuId,
};

/// Bounded retry parameters for commit's step 3 (ACS `COMMIT_LOCAL` after
/// the DSS decrement has already settled).
#[derive(Debug, Clone)]
pub struct CommitRetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for CommitRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// The reservation engine. Cheap to clone — every field is an `Arc` or a
/// plain value, so handlers share one instance across tasks.
#[derive(Clone)]
pub struct ReservationEngine {
    counter_store: Arc<dyn CounterStore>,
    durable_stock: Arc<dyn DurableStock>,
    default_hold_ttl_ms: i64,
    commit_retry: CommitRetryConfig,
}

impl ReservationEngine {
    pub fn new(
        counter_store: Arc<dyn CounterStore>,
        durable_stock: Arc<dyn DurableStock>,
        default_hold_ttl_ms: i64,
        commit_retry: CommitRetryConfig,
    ) -> Self {
        Self {
            counter_store,
            durable_stock,
            default_hold_ttl_ms,
            commit_retry,
        }
    }

    fn validate_qty(qty: i64) -> EngineResult<()> {
        if qty <= 0 {
            return Err(EngineError::bad_request("qty must be positive"));
        }
        Ok(())
    }

    /// `reserve(sku, cart_id, qty, ttl_ms = default)`.
    pub async fn reserve(
        &self,
        sku: &SkuId,
        cart: &CartId,
        qty: i64,
        ttl_ms: Option<i64>,
    ) -> EngineResult<ReserveOutcome> {
        Self::validate_qty(qty)?;
        let ttl_ms = ttl_ms.unwrap_or(self.default_hold_ttl_ms);
        if ttl_ms <= 0 {
            return Err(EngineError::bad_request("ttl_ms must be positive"));
        }

        let now_ms = Utc::now().timestamp_millis();
        let outcome = self
            .counter_store
            .reserve(sku, cart, qty, ttl_ms, now_ms)
            .await;

        match &outcome {
            Ok(o) => info!(
                sku = %sku,
                cart_id = %cart,
                qty,
                hold_id = %o.hold_id,
                idempotent = o.idempotent,
                "reserve succeeded"
            ),
            Err(e) => warn!(sku = %sku, cart_id = %cart, qty, error = %e, "reserve failed"),
        }

        outcome
    }

    /// `extend(sku, cart_id, add_ms)`.
    pub async fn extend(
        &self,
        sku: &SkuId,
        cart: &CartId,
        add_ms: i64,
    ) -> EngineResult<ExtendOutcome> {
        if add_ms <= 0 {
            return Err(EngineError::bad_request("add_ms must be positive"));
        }
        let now_ms = Utc::now().timestamp_millis();
        let outcome = self.counter_store.extend(sku, cart, add_ms, now_ms).await;

        match &outcome {
            Ok(o) => info!(sku = %sku, cart_id = %cart, new_expires_at_ms = o.new_expires_at_ms, "extend succeeded"),
            Err(e) => warn!(sku = %sku, cart_id = %cart, error = %e, "extend failed"),
        }

        outcome
    }

    /// `commit(cart_id, sku)` — the only cross-store operation. Ordering is
    /// fixed: DSS first, ACS second.
    ///
    /// 1. Read-only lookup of the hold in the ACS; absent is `not_found`.
    /// 2. Conditional decrement against the DSS. Zero rows updated means the
    ///    DSS no longer has stock: compensate with `RELEASE` on the ACS and
    ///    fail `conflict`. A DSS I/O error fails `unavailable` without any
    ///    ACS mutation — safe, the Reaper will release by lease expiry.
    /// 3. `COMMIT_LOCAL` on the ACS, retried with bounded backoff on
    ///    transient failure — safe because the DSS side already settled. A
    ///    `not_found` here means the Reaper won the race between steps 1
    ///    and 3; the DSS decrement stands, so this is treated as success.
    pub async fn commit(&self, sku: &SkuId, cart: &CartId) -> EngineResult<CommitOutcome> {
        let qty = self
            .counter_store
            .peek_hold(sku, cart)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("no hold for cart_id={cart} sku={sku}"))
            })?;

        // `conditional_decrement` returns the post-decrement total atomically
        // with the decrement itself (a single `RETURNING` statement), so this
        // commit's `new_total` can never be clobbered by a concurrent commit
        // against the same SKU from a different cart racing in between a
        // decrement and a separate follow-up read.
        let new_total = match self.durable_stock.conditional_decrement(sku, qty).await? {
            Some(new_total) => new_total,
            None => {
                warn!(sku = %sku, cart_id = %cart, qty, "durable store conflict on commit, compensating");
                if let Err(e) = self
                    .counter_store
                    .release(sku, cart, ReleaseReason::Manual)
                    .await
                {
                    error!(
                        sku = %sku, cart_id = %cart, error = %e,
                        "compensating release after durable store conflict failed; lease expiry will recover"
                    );
                }
                return Err(EngineError::Conflict(format!(
                    "durable store no longer has {qty} units of sku={sku} available"
                )));
            }
        };

        match self.commit_local_with_retry(sku, cart).await {
            Ok(consumed_qty) => Ok(CommitOutcome {
                consumed_qty,
                new_total,
            }),
            Err(EngineError::NotFound(msg)) => {
                info!(
                    sku = %sku, cart_id = %cart, detail = %msg,
                    "ACS hold already reaped before commit_local; treating as success"
                );
                Ok(CommitOutcome {
                    consumed_qty: qty,
                    new_total,
                })
            }
            Err(e) => {
                error!(
                    sku = %sku, cart_id = %cart, error = %e,
                    "commit_local exhausted retries; durable store has advanced but ACS hold remains \
                     (divergence alert — lease expiry and the replicator will converge)"
                );
                Err(e)
            }
        }
    }

    async fn commit_local_with_retry(&self, sku: &SkuId, cart: &CartId) -> EngineResult<i64> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.counter_store.commit_local(sku, cart).await {
                Ok(outcome) => return Ok(outcome.consumed_qty),
                Err(EngineError::NotFound(msg)) => return Err(EngineError::NotFound(msg)),
                Err(e) if attempt >= self.commit_retry.max_retries => return Err(e),
                Err(e) => {
                    warn!(
                        sku = %sku, cart_id = %cart, attempt, error = %e,
                        "commit_local transient failure, retrying"
                    );
                    tokio::time::sleep(self.commit_retry.retry_delay).await;
                }
            }
        }
    }

    /// `release(sku, cart_id)` — caller-initiated, idempotent.
    pub async fn release(&self, sku: &SkuId, cart: &CartId) -> EngineResult<ReleaseOutcome> {
        let outcome = self
            .counter_store
            .release(sku, cart, ReleaseReason::Manual)
            .await;

        match &outcome {
            Ok(o) => info!(sku = %sku, cart_id = %cart, released_qty = o.released_qty, absent = o.absent, "release succeeded"),
            Err(e) => warn!(sku = %sku, cart_id = %cart, error = %e, "release failed"),
        }

        outcome
    }

    /// `snapshot(sku)`.
    pub async fn snapshot(&self, sku: &SkuId) -> EngineResult<Snapshot> {
        self.counter_store.snapshot(sku).await
    }

    /// `events(limit)`.
    pub async fn events(&self, limit: usize) -> EngineResult<Vec<EventRecord>> {
        self.counter_store.events(limit).await
    }

    /// Administrative seed, per §4.5: establish a SKU's authoritative
    /// `total` in the DSS. Not part of the reservation protocol.
    pub async fn seed_total(&self, sku: &SkuId, total: i64) -> EngineResult<()> {
        if total < 0 {
            return Err(EngineError::bad_request("total must be non-negative"));
        }
        self.durable_stock.seed_total(sku, total).await
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        self.counter_store.health_check().await?;
        self.durable_stock.health_check().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryCounterStore, InMemoryDurableStock};

    fn engine() -> (ReservationEngine, Arc<InMemoryDurableStock>) {
        let counter = Arc::new(InMemoryCounterStore::new(true));
        let durable = Arc::new(InMemoryDurableStock::new());
        let eng = ReservationEngine::new(
            counter,
            durable.clone(),
            600_000,
            CommitRetryConfig::default(),
        );
        (eng, durable)
    }

    fn sku(s: &str) -> SkuId {
        SkuId::new(s, true).unwrap()
    }

    fn cart(s: &str) -> CartId {
        CartId::new(s, true).unwrap()
    }

    /// Scenario 1: happy path — seed, reserve, commit, verify totals.
    #[tokio::test]
    async fn happy_path_reserve_then_commit() {
        let (eng, _durable) = engine();
        let sku = sku("widget");
        let cart = cart("cart-1");

        eng.seed_total(&sku, 10).await.unwrap();
        let reserved = eng.reserve(&sku, &cart, 4, None).await.unwrap();
        assert!(!reserved.idempotent);

        let commit = eng.commit(&sku, &cart).await.unwrap();
        assert_eq!(commit.consumed_qty, 4);
        assert_eq!(commit.new_total, 6);

        let snap = eng.snapshot(&sku).await.unwrap();
        assert_eq!(snap.reserved, 0);
    }

    /// Scenario 2: oversell guard — second reserve beyond availability fails.
    #[tokio::test]
    async fn oversell_guard_rejects_excess_reserve() {
        let (eng, _durable) = engine();
        let sku = sku("widget");

        eng.seed_total(&sku, 5).await.unwrap();
        eng.reserve(&sku, &cart("cart-a"), 5, None).await.unwrap();

        let err = eng.reserve(&sku, &cart("cart-b"), 1, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Insufficient { available: 0 }));
    }

    /// Scenario 3: abandoned hold is released by explicit caller action
    /// (the reaper path is exercised separately in `reaper.rs`-adjacent
    /// integration tests); commit after release is `not_found`.
    #[tokio::test]
    async fn release_then_commit_is_not_found() {
        let (eng, _durable) = engine();
        let sku = sku("widget");
        let cart = cart("cart-1");

        eng.seed_total(&sku, 10).await.unwrap();
        eng.reserve(&sku, &cart, 3, None).await.unwrap();
        eng.release(&sku, &cart).await.unwrap();

        let err = eng.commit(&sku, &cart).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    /// Scenario: DSS conflict on commit (external consumption) triggers a
    /// compensating ACS release and surfaces `conflict` to the caller.
    #[tokio::test]
    async fn durable_store_conflict_compensates_with_release() {
        let (eng, durable) = engine();
        let sku = sku("widget");
        let cart = cart("cart-1");

        eng.seed_total(&sku, 10).await.unwrap();
        eng.reserve(&sku, &cart, 4, None).await.unwrap();

        // External consumption drains the DSS out from under the hold.
        durable.conditional_decrement(&sku, 10).await.unwrap();

        let err = eng.commit(&sku, &cart).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        // Compensating release freed the ACS reservation.
        let snap = eng.snapshot(&sku).await.unwrap();
        assert_eq!(snap.reserved, 0);
    }

    /// Idempotent reserve replay: same (cart, sku, qty) twice returns the
    /// same logical hold, not a double reservation.
    #[tokio::test]
    async fn idempotent_reserve_replay_does_not_double_count() {
        let (eng, _durable) = engine();
        let sku = sku("widget");
        let cart = cart("cart-1");

        eng.seed_total(&sku, 10).await.unwrap();
        eng.reserve(&sku, &cart, 4, None).await.unwrap();
        let replay = eng.reserve(&sku, &cart, 4, None).await.unwrap();
        assert!(replay.idempotent);

        let snap = eng.snapshot(&sku).await.unwrap();
        assert_eq!(snap.reserved, 4);
    }

    #[tokio::test]
    async fn reserve_rejects_non_positive_qty() {
        let (eng, _durable) = engine();
        let err = eng
            .reserve(&sku("widget"), &cart("cart-1"), 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }
}
