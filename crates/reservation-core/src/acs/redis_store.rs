//! [`CounterStore`] backed by Redis: the four Lua scripts for mutation,
//! plain commands for the two read paths (`snapshot`, `due_holds`) the
//! spec explicitly allows outside scripting, plus a Redis Stream for the
//! optional Event Log.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::AsyncCommands;

use crate::acs::connection::AcsPool;
use crate::acs::keys::{self, EXPIRY_INDEX_KEY, HOLDS_SEQ_KEY};
use crate::acs::scripts::{self, COMMIT_LOCAL, EXTEND, RELEASE, RESERVE};
use crate::counter_store::CounterStore;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    CartId, CommitLocalOutcome, EventKind, EventRecord, ExtendOutcome, ReleaseOutcome,
    ReleaseReason, ReserveOutcome, Snapshot, SkuId,
};

/// Redis-backed `CounterStore`.
pub struct RedisCounterStore {
    pool: AcsPool,
    events_enabled: bool,
    events_stream: String,
}

impl RedisCounterStore {
    pub fn new(pool: AcsPool, events_enabled: bool, events_stream: impl Into<String>) -> Self {
        Self {
            pool,
            events_enabled,
            events_stream: events_stream.into(),
        }
    }

    fn events_flag(&self) -> &'static str {
        if self.events_enabled {
            "1"
        } else {
            "0"
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn reserve(
        &self,
        sku: &SkuId,
        cart: &CartId,
        qty: i64,
        ttl_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ReserveOutcome> {
        let mut conn = self.pool.connection().await?;
        let (expires_at, available_after, idempotent): (i64, i64, i64) = RESERVE
            .key(keys::inventory_key(sku))
            .key(keys::hold_key(cart, sku))
            .key(EXPIRY_INDEX_KEY)
            .key(&self.events_stream)
            .key(HOLDS_SEQ_KEY)
            .arg(cart.as_str())
            .arg(sku.as_str())
            .arg(qty)
            .arg(ttl_ms)
            .arg(now_ms)
            .arg(self.events_flag())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| scripts::parse_script_error(&e))?;

        Ok(ReserveOutcome {
            hold_id: keys::member(cart, sku),
            expires_at_ms: expires_at,
            available_after,
            idempotent: idempotent == 1,
        })
    }

    async fn extend(
        &self,
        sku: &SkuId,
        cart: &CartId,
        add_ms: i64,
        now_ms: i64,
    ) -> EngineResult<ExtendOutcome> {
        let mut conn = self.pool.connection().await?;
        let new_expires_at_ms: i64 = EXTEND
            .key(keys::hold_key(cart, sku))
            .key(EXPIRY_INDEX_KEY)
            .key(&self.events_stream)
            .key(HOLDS_SEQ_KEY)
            .arg(cart.as_str())
            .arg(sku.as_str())
            .arg(add_ms)
            .arg(now_ms)
            .arg(self.events_flag())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| scripts::parse_script_error(&e))?;

        Ok(ExtendOutcome { new_expires_at_ms })
    }

    async fn commit_local(&self, sku: &SkuId, cart: &CartId) -> EngineResult<CommitLocalOutcome> {
        let mut conn = self.pool.connection().await?;
        let now_ms = Utc::now().timestamp_millis();
        let result: Result<i64, redis::RedisError> = COMMIT_LOCAL
            .key(keys::inventory_key(sku))
            .key(keys::hold_key(cart, sku))
            .key(EXPIRY_INDEX_KEY)
            .key(&self.events_stream)
            .arg(cart.as_str())
            .arg(sku.as_str())
            .arg(self.events_flag())
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(consumed_qty) => Ok(CommitLocalOutcome { consumed_qty }),
            Err(e) => Err(scripts::parse_script_error(&e)),
        }
    }

    async fn release(
        &self,
        sku: &SkuId,
        cart: &CartId,
        reason: ReleaseReason,
    ) -> EngineResult<ReleaseOutcome> {
        let mut conn = self.pool.connection().await?;
        let now_ms = Utc::now().timestamp_millis();
        let (released_qty, absent): (i64, i64) = RELEASE
            .key(keys::inventory_key(sku))
            .key(keys::hold_key(cart, sku))
            .key(EXPIRY_INDEX_KEY)
            .key(&self.events_stream)
            .arg(cart.as_str())
            .arg(sku.as_str())
            .arg(reason.as_str())
            .arg(self.events_flag())
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| scripts::parse_script_error(&e))?;

        Ok(ReleaseOutcome {
            released_qty,
            absent: absent == 1,
        })
    }

    async fn snapshot(&self, sku: &SkuId) -> EngineResult<Snapshot> {
        let mut conn = self.pool.connection().await?;
        let fields: std::collections::HashMap<String, i64> = conn
            .hgetall(keys::inventory_key(sku))
            .await
            .map_err(|e| EngineError::unavailable(e.to_string()))?;

        let total = fields.get("total").copied().unwrap_or(0);
        let reserved = fields.get("reserved").copied().unwrap_or(0);
        Ok(Snapshot::new(total, reserved))
    }

    async fn peek_hold(&self, sku: &SkuId, cart: &CartId) -> EngineResult<Option<i64>> {
        let mut conn = self.pool.connection().await?;
        let qty: Option<i64> = conn
            .hget(keys::hold_key(cart, sku), "qty")
            .await
            .map_err(|e| EngineError::unavailable(e.to_string()))?;
        Ok(qty)
    }

    async fn due_holds(&self, now_ms: i64, batch: usize) -> EngineResult<Vec<(CartId, SkuId)>> {
        let mut conn = self.pool.connection().await?;
        let members: Vec<String> = conn
            .zrangebyscore_limit(EXPIRY_INDEX_KEY, 0, due_max_score(now_ms), 0, batch as isize)
            .await
            .map_err(|e| EngineError::unavailable(e.to_string()))?;

        let mut out = Vec::with_capacity(members.len());
        for raw in members {
            if let Some((cart_raw, sku_raw)) = keys::split_member(&raw) {
                // Members came from our own ZADD calls, so lenient validation
                // (no `strict_id_validation` re-check) is correct here.
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
        let mut conn = self.pool.connection().await?;
        let entries: Vec<(String, Vec<(String, String)>)> = redis::cmd("XREVRANGE")
            .arg(&self.events_stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(|e| EngineError::unavailable(e.to_string()))?;

        let mut out = Vec::with_capacity(entries.len());
        for (_id, fields) in entries {
            if let Some(record) = parse_event_fields(&fields) {
                out.push(record);
            }
        }
        // XREVRANGE returns newest-first; we flip to oldest-last within the
        // returned window so the event log reads like a timeline, matching
        // the ordering `testing.rs`'s in-memory double uses.
        out.reverse();
        Ok(out)
    }

    async fn health_check(&self) -> EngineResult<()> {
        self.pool.health_check().await
    }
}

/// Scores in the expiry index are `expires_at * 1000 + seq` (see
/// `acs/scripts.rs`), so "due by now_ms" is every score below the start of
/// the next millisecond's bucket, not `now_ms` itself.
fn due_max_score(now_ms: i64) -> i64 {
    (now_ms + 1) * 1000 - 1
}

fn parse_event_fields(fields: &[(String, String)]) -> Option<EventRecord> {
    let get = |key: &str| fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

    let kind = match get("kind")?.as_str() {
        "hold_created" => EventKind::HoldCreated,
        "hold_extended" => EventKind::HoldExtended,
        "hold_committed" => EventKind::HoldCommitted,
        "hold_released" => EventKind::HoldReleased,
        _ => return None,
    };
    let sku = SkuId::new(get("sku")?, false).ok()?;
    let cart_id = CartId::new(get("cart_id")?, false).ok()?;
    let qty: i64 = get("qty")?.parse().ok()?;
    let ts_ms: i64 = get("ts")?.parse().ok()?;
    let ts: DateTime<Utc> = Utc.timestamp_millis_opt(ts_ms).single()?;
    let reason = get("reason").and_then(|r| match r.as_str() {
        "manual" => Some(ReleaseReason::Manual),
        "expired" => Some(ReleaseReason::Expired),
        _ => None,
    });

    Some(EventRecord {
        ts,
        kind,
        sku,
        cart_id,
        qty,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_max_score_covers_every_seq_in_now_ms_but_not_the_next_millisecond() {
        let now_ms = 1_700_000_000_000;
        let max = due_max_score(now_ms);
        assert!(now_ms * 1000 + 999 <= max);
        assert!(max < (now_ms + 1) * 1000);
    }
}
