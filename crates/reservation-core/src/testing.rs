//! In-memory test doubles for [`CounterStore`] and [`DurableStock`].
//!
//! Each double serializes its operations behind a single `Mutex`, the
//! in-process equivalent of "a single-writer task" — never a client-side
//! read-modify-write loop, which is exactly the anti-pattern the real ACS
//! scripts exist to avoid. This lets the engine's concurrency and
//! invariant tests run deterministically without a live Redis or Postgres.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::TimeZone;
use dashmap::DashMap;

use crate::counter_store::CounterStore;
use crate::durable_stock::DurableStock;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    CartId, CommitLocalOutcome, EventKind, EventRecord, ExtendOutcome, ReleaseOutcome,
    ReleaseReason, ReserveOutcome, Snapshot, SkuId,
};

#[derive(Debug, Clone)]
struct HoldState {
    qty: i64,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
struct InventoryState {
    total: i64,
    reserved: i64,
}

/// In-memory `CounterStore`. Per-SKU inventory counters live in a
/// [`DashMap`] (the teacher's pattern for sharded concurrent state, e.g.
/// `websocket::broadcast::ConnectionManager`); every mutating operation
/// additionally takes a process-wide [`Mutex`] so a reserve/commit/release
/// sequence observes the same atomicity the Lua scripts give the real ACS.
pub struct InMemoryCounterStore {
    inventory: DashMap<String, InventoryState>,
    holds: Mutex<HashMap<String, HoldState>>,
    expiry_index: Mutex<Vec<(i64, String)>>,
    events: Mutex<Vec<EventRecord>>,
    write_lock: Mutex<()>,
    events_enabled: bool,
}

impl InMemoryCounterStore {
    pub fn new(events_enabled: bool) -> Self {
        Self {
            inventory: DashMap::new(),
            holds: Mutex::new(HashMap::new()),
            expiry_index: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
            events_enabled,
        }
    }

    fn record_event(
        &self,
        kind: EventKind,
        sku: &SkuId,
        cart: &CartId,
        qty: i64,
        reason: Option<ReleaseReason>,
        now_ms: i64,
    ) {
        if !self.events_enabled {
            return;
        }
        let ts = chrono::Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(chrono::Utc::now);
        self.events.lock().unwrap().push(EventRecord {
            ts,
            kind,
            sku: sku.clone(),
            cart_id: cart.clone(),
            qty,
            reason,
        });
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn reserve(
        &self,
        sku: &SkuId,
        cart: &CartId,
        qty: i64,
        ttl_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ReserveOutcome> {
        let _guard = self.write_lock.lock().unwrap();
        let member = crate::types::hold_id(cart, sku);

        let mut holds = self.holds.lock().unwrap();
        if let Some(existing) = holds.get(&member) {
            if existing.qty == qty {
                let expires_at = now_ms + ttl_ms;
                let mut existing = existing.clone();
                existing.expires_at_ms = expires_at;
                holds.insert(member.clone(), existing);
                drop(holds);

                let mut index = self.expiry_index.lock().unwrap();
                index.retain(|(_, m)| m != &member);
                index.push((expires_at, member));
                drop(index);

                let inv = self.inventory.entry(sku.as_str().to_string()).or_default();
                return Ok(ReserveOutcome {
                    hold_id: crate::types::hold_id(cart, sku),
                    expires_at_ms: expires_at,
                    available_after: inv.total - inv.reserved,
                    idempotent: true,
                });
            }
            return Err(EngineError::conflict_existing_qty(sku, existing.qty, qty));
        }
        drop(holds);

        let mut inv = self.inventory.entry(sku.as_str().to_string()).or_default();
        let available = inv.total - inv.reserved;
        if available < qty {
            return Err(EngineError::Insufficient { available });
        }
        let new_reserved = inv.reserved.checked_add(qty).ok_or_else(|| {
            EngineError::internal("overflow incrementing reserved counter")
        })?;
        inv.reserved = new_reserved;
        let available_after = inv.total - new_reserved;
        drop(inv);

        let expires_at = now_ms + ttl_ms;
        self.holds.lock().unwrap().insert(
            member.clone(),
            HoldState {
                qty,
                expires_at_ms: expires_at,
            },
        );
        self.expiry_index.lock().unwrap().push((expires_at, member));

        self.record_event(EventKind::HoldCreated, sku, cart, qty, None, now_ms);

        Ok(ReserveOutcome {
            hold_id: crate::types::hold_id(cart, sku),
            expires_at_ms: expires_at,
            available_after,
            idempotent: false,
        })
    }

    async fn extend(
        &self,
        sku: &SkuId,
        cart: &CartId,
        add_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ExtendOutcome> {
        let _guard = self.write_lock.lock().unwrap();
        let member = crate::types::hold_id(cart, sku);

        let mut holds = self.holds.lock().unwrap();
        let hold = holds
            .get_mut(&member)
            .ok_or_else(|| EngineError::not_found(format!("no hold for {member}")))?;

        let base = hold.expires_at_ms.max(now_ms);
        let new_expires = base
            .checked_add(add_ms)
            .ok_or_else(|| EngineError::internal("overflow computing new expiry"))?;
        hold.expires_at_ms = new_expires;
        let qty = hold.qty;
        drop(holds);

        let mut index = self.expiry_index.lock().unwrap();
        index.retain(|(_, m)| m != &member);
        index.push((new_expires, member));
        drop(index);

        self.record_event(EventKind::HoldExtended, sku, cart, qty, None, now_ms);

        Ok(ExtendOutcome {
            new_expires_at_ms: new_expires,
        })
    }

    async fn commit_local(&self, sku: &SkuId, cart: &CartId) -> EngineResult<CommitLocalOutcome> {
        let _guard = self.write_lock.lock().unwrap();
        let member = crate::types::hold_id(cart, sku);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut holds = self.holds.lock().unwrap();
        let hold = match holds.remove(&member) {
            Some(hold) => hold,
            None => return Err(EngineError::not_found(format!("no hold for {member}"))),
        };
        drop(holds);

        self.expiry_index.lock().unwrap().retain(|(_, m)| m != &member);

        let mut inv = self.inventory.entry(sku.as_str().to_string()).or_default();
        inv.reserved = (inv.reserved - hold.qty).max(0);
        drop(inv);

        self.record_event(EventKind::HoldCommitted, sku, cart, hold.qty, None, now_ms);

        Ok(CommitLocalOutcome {
            consumed_qty: hold.qty,
        })
    }

    async fn release(
        &self,
        sku: &SkuId,
        cart: &CartId,
        reason: ReleaseReason,
    ) -> EngineResult<ReleaseOutcome> {
        let _guard = self.write_lock.lock().unwrap();
        let member = crate::types::hold_id(cart, sku);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut holds = self.holds.lock().unwrap();
        let hold = match holds.remove(&member) {
            Some(hold) => hold,
            None => {
                return Ok(ReleaseOutcome {
                    released_qty: 0,
                    absent: true,
                })
            }
        };
        drop(holds);

        self.expiry_index.lock().unwrap().retain(|(_, m)| m != &member);

        let mut inv = self.inventory.entry(sku.as_str().to_string()).or_default();
        inv.reserved = (inv.reserved - hold.qty).max(0);
        drop(inv);

        self.record_event(EventKind::HoldReleased, sku, cart, hold.qty, Some(reason), now_ms);

        Ok(ReleaseOutcome {
            released_qty: hold.qty,
            absent: false,
        })
    }

    async fn snapshot(&self, sku: &SkuId) -> EngineResult<Snapshot> {
        let inv = self.inventory.entry(sku.as_str().to_string()).or_default();
        Ok(Snapshot::new(inv.total, inv.reserved))
    }

    async fn peek_hold(&self, sku: &SkuId, cart: &CartId) -> EngineResult<Option<i64>> {
        let member = crate::types::hold_id(cart, sku);
        Ok(self.holds.lock().unwrap().get(&member).map(|h| h.qty))
    }

    async fn due_holds(&self, now_ms: i64, batch: usize) -> EngineResult<Vec<(CartId, SkuId)>> {
        let index = self.expiry_index.lock().unwrap();
        let mut due: Vec<&(i64, String)> = index.iter().filter(|(exp, _)| *exp <= now_ms).collect();
        due.sort_by_key(|(exp, _)| *exp);
        due.truncate(batch);

        let mut out = Vec::with_capacity(due.len());
        for (_, member) in due {
            if let Some((cart_raw, sku_raw)) = member.split_once(':') {
                if let (Ok(cart), Ok(sku)) = (
                    CartId::new(cart_raw, false),
                    SkuId::new(sku_raw, false),
                ) {
                    out.push((cart, sku));
                }
            }
        }
        Ok(out)
    }

    async fn events(&self, limit: usize) -> EngineResult<Vec<EventRecord>> {
        let events = self.events.lock().unwrap();
        let start = events.len().saturating_sub(limit);
        Ok(events[start..].to_vec())
    }

    async fn health_check(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// In-memory `DurableStock`, keyed the same way as the Postgres `inventory`
/// table. A single `Mutex` stands in for the conditional `UPDATE ... WHERE
/// total >= qty` row lock.
#[derive(Default)]
pub struct InMemoryDurableStock {
    totals: Mutex<HashMap<String, i64>>,
}

impl InMemoryDurableStock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStock for InMemoryDurableStock {
    async fn conditional_decrement(&self, sku: &SkuId, qty: i64) -> EngineResult<Option<i64>> {
        if qty <= 0 {
            return Err(EngineError::bad_request("qty must be positive"));
        }
        let mut totals = self.totals.lock().unwrap();
        match totals.get_mut(sku.as_str()) {
            Some(total) if *total >= qty => {
                *total -= qty;
                Ok(Some(*total))
            }
            _ => Ok(None),
        }
    }

    async fn get_total(&self, sku: &SkuId) -> EngineResult<Option<i64>> {
        Ok(self.totals.lock().unwrap().get(sku.as_str()).copied())
    }

    async fn seed_total(&self, sku: &SkuId, total: i64) -> EngineResult<()> {
        if total < 0 {
            return Err(EngineError::bad_request("total must be non-negative"));
        }
        self.totals
            .lock()
            .unwrap()
            .insert(sku.as_str().to_string(), total);
        Ok(())
    }

    async fn health_check(&self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku(s: &str) -> SkuId {
        SkuId::new(s, true).unwrap()
    }

    fn cart(s: &str) -> CartId {
        CartId::new(s, true).unwrap()
    }

    #[tokio::test]
    async fn reserve_then_commit_local_drains_reserved() {
        let store = InMemoryCounterStore::new(true);
        let sku = sku("sku-1");
        let cart = cart("cart-1");

        store.reserve(&sku, &cart, 5, 60_000, 0).await.unwrap();
        let snap = store.snapshot(&sku).await.unwrap();
        assert_eq!(snap.reserved, 5);

        let outcome = store.commit_local(&sku, &cart).await.unwrap();
        assert_eq!(outcome.consumed_qty, 5);

        let snap = store.snapshot(&sku).await.unwrap();
        assert_eq!(snap.reserved, 0);
    }

    #[tokio::test]
    async fn reserve_replay_is_idempotent() {
        let store = InMemoryCounterStore::new(true);
        let sku = sku("sku-1");
        let cart = cart("cart-1");

        let first = store.reserve(&sku, &cart, 3, 60_000, 0).await.unwrap();
        assert!(!first.idempotent);
        let second = store.reserve(&sku, &cart, 3, 60_000, 1_000).await.unwrap();
        assert!(second.idempotent);
    }

    #[tokio::test]
    async fn reserve_replay_with_different_qty_conflicts() {
        let store = InMemoryCounterStore::new(true);
        let sku = sku("sku-1");
        let cart = cart("cart-1");

        store.reserve(&sku, &cart, 3, 60_000, 0).await.unwrap();
        let err = store.reserve(&sku, &cart, 4, 60_000, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn due_holds_returns_expired_in_ascending_order() {
        let store = InMemoryCounterStore::new(false);
        let sku = sku("sku-1");

        store
            .reserve(&sku, &cart("cart-a"), 1, 100, 0)
            .await
            .unwrap();
        store
            .reserve(&sku, &cart("cart-b"), 1, 50, 0)
            .await
            .unwrap();

        let due = store.due_holds(1_000, 10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].0.as_str(), "cart-b");
        assert_eq!(due[1].0.as_str(), "cart-a");
    }

    #[tokio::test]
    async fn durable_stock_conditional_decrement_respects_floor() {
        let store = InMemoryDurableStock::new();
        let sku = sku("sku-1");
        store.seed_total(&sku, 5).await.unwrap();

        assert_eq!(store.conditional_decrement(&sku, 5).await.unwrap(), Some(0));
        assert_eq!(store.conditional_decrement(&sku, 1).await.unwrap(), None);
        assert_eq!(store.get_total(&sku).await.unwrap(), Some(0));
    }
}
