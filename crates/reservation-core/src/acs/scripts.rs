//! The four named ACS scripts (spec §4.1), implemented as server-side Lua
//! so each executes to completion without interleaving with any other
//! script or command against the keys it touches (I2–I5). This is the
//! only place in the crate that opens a Lua source string — every other
//! module talks to the ACS only through [`crate::counter_store::CounterStore`].
//!
//! Domain failures (`insufficient`, `conflict`, `not_found`, `internal`)
//! are signalled with `redis.error_reply`, prefixed with an uppercase
//! token (`INSUFFICIENT`, `CONFLICT`, `NOTFOUND`, `INTERNAL`) that
//! [`parse_script_error`] recovers on the Rust side — scripting has no
//! richer error channel than a string.

use once_cell::sync::Lazy;

use crate::error::EngineError;

pub static RESERVE: Lazy<redis::Script> = Lazy::new(|| redis::Script::new(RESERVE_SRC));
pub static EXTEND: Lazy<redis::Script> = Lazy::new(|| redis::Script::new(EXTEND_SRC));
pub static COMMIT_LOCAL: Lazy<redis::Script> = Lazy::new(|| redis::Script::new(COMMIT_LOCAL_SRC));
pub static RELEASE: Lazy<redis::Script> = Lazy::new(|| redis::Script::new(RELEASE_SRC));

/// KEYS: inv_key, hold_key, expiry_index_key, events_key, seq_key
/// ARGV: cart_id, sku, qty, ttl_ms, now_ms, events_enabled("1"/"0")
/// Returns: {expires_at, available_after, idempotent(0/1)}
///
/// The expiry index is scored with `expires_at * 1000 + (seq mod 1000)`,
/// not a bare `expires_at`, so that two holds due in the same millisecond
/// sort by insertion order (the lower-order digits) rather than by Redis's
/// score-tie fallback of member lexicographic order.
const RESERVE_SRC: &str = r#"
local inv_key = KEYS[1]
local hold_key = KEYS[2]
local exp_key = KEYS[3]
local events_key = KEYS[4]
local seq_key = KEYS[5]

local cart_id = ARGV[1]
local sku = ARGV[2]
local qty = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])
local now_ms = tonumber(ARGV[5])
local events_enabled = ARGV[6] == '1'

local member = cart_id .. ':' .. sku

local existing_qty = redis.call('HGET', hold_key, 'qty')
if existing_qty then
  existing_qty = tonumber(existing_qty)
  if existing_qty == qty then
    local expires_at = now_ms + ttl_ms
    local seq = redis.call('INCR', seq_key) % 1000
    redis.call('HSET', hold_key, 'expires_at', expires_at)
    redis.call('ZADD', exp_key, expires_at * 1000 + seq, member)
    local total = tonumber(redis.call('HGET', inv_key, 'total') or '0')
    local reserved = tonumber(redis.call('HGET', inv_key, 'reserved') or '0')
    if events_enabled then
      redis.call('XADD', events_key, '*', 'kind', 'hold_created', 'sku', sku, 'cart_id', cart_id, 'qty', qty, 'ts', now_ms)
    end
    return {expires_at, total - reserved, 1}
  else
    return redis.error_reply('CONFLICT existing_qty=' .. existing_qty .. ' requested_qty=' .. qty)
  end
end

local total = tonumber(redis.call('HGET', inv_key, 'total') or '0')
local reserved = tonumber(redis.call('HGET', inv_key, 'reserved') or '0')
local available = total - reserved
if available < qty then
  return redis.error_reply('INSUFFICIENT available=' .. available)
end

local new_reserved = reserved + qty
if new_reserved < reserved then
  return redis.error_reply('INTERNAL overflow incrementing reserved counter')
end

redis.call('HSET', inv_key, 'reserved', new_reserved)
local expires_at = now_ms + ttl_ms
local seq = redis.call('INCR', seq_key) % 1000
redis.call('HSET', hold_key, 'qty', qty, 'expires_at', expires_at, 'created_at', now_ms)
redis.call('ZADD', exp_key, expires_at * 1000 + seq, member)

if events_enabled then
  redis.call('XADD', events_key, '*', 'kind', 'hold_created', 'sku', sku, 'cart_id', cart_id, 'qty', qty, 'ts', now_ms)
end

return {expires_at, total - new_reserved, 0}
"#;

/// KEYS: hold_key, expiry_index_key, events_key, seq_key
/// ARGV: cart_id, sku, add_ms, now_ms, events_enabled
/// Returns: new_expires_at
///
/// Same composite-score scheme as `RESERVE` (see its comment) so an
/// extension that lands in the same millisecond as another hold's deadline
/// still sorts by insertion order, not member name.
const EXTEND_SRC: &str = r#"
local hold_key = KEYS[1]
local exp_key = KEYS[2]
local events_key = KEYS[3]
local seq_key = KEYS[4]

local cart_id = ARGV[1]
local sku = ARGV[2]
local add_ms = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])
local events_enabled = ARGV[5] == '1'

local member = cart_id .. ':' .. sku

local current_expires = redis.call('HGET', hold_key, 'expires_at')
if not current_expires then
  return redis.error_reply('NOTFOUND no hold for ' .. member)
end
current_expires = tonumber(current_expires)

local base = current_expires
if now_ms > base then
  base = now_ms
end
local new_expires = base + add_ms
if new_expires < base then
  return redis.error_reply('INTERNAL overflow computing new expiry')
end

local seq = redis.call('INCR', seq_key) % 1000
redis.call('HSET', hold_key, 'expires_at', new_expires)
redis.call('ZADD', exp_key, new_expires * 1000 + seq, member)

if events_enabled then
  local qty = redis.call('HGET', hold_key, 'qty')
  redis.call('XADD', events_key, '*', 'kind', 'hold_extended', 'sku', sku, 'cart_id', cart_id, 'qty', qty, 'ts', now_ms)
end

return new_expires
"#;

/// KEYS: inv_key, hold_key, expiry_index_key, events_key
/// ARGV: cart_id, sku, events_enabled, now_ms
/// Returns: consumed_qty
const COMMIT_LOCAL_SRC: &str = r#"
local inv_key = KEYS[1]
local hold_key = KEYS[2]
local exp_key = KEYS[3]
local events_key = KEYS[4]

local cart_id = ARGV[1]
local sku = ARGV[2]
local events_enabled = ARGV[3] == '1'
local now_ms = ARGV[4]

local member = cart_id .. ':' .. sku

local qty = redis.call('HGET', hold_key, 'qty')
if not qty then
  return redis.error_reply('NOTFOUND no hold for ' .. member)
end
qty = tonumber(qty)

local reserved = tonumber(redis.call('HGET', inv_key, 'reserved') or '0')
local new_reserved = reserved - qty
if new_reserved < 0 then
  new_reserved = 0
end
redis.call('HSET', inv_key, 'reserved', new_reserved)

redis.call('DEL', hold_key)
redis.call('ZREM', exp_key, member)

if events_enabled then
  redis.call('XADD', events_key, '*', 'kind', 'hold_committed', 'sku', sku, 'cart_id', cart_id, 'qty', qty, 'ts', now_ms)
end

return qty
"#;

/// KEYS: inv_key, hold_key, expiry_index_key, events_key
/// ARGV: cart_id, sku, reason, events_enabled, now_ms
/// Returns: {released_qty, absent(0/1)}
const RELEASE_SRC: &str = r#"
local inv_key = KEYS[1]
local hold_key = KEYS[2]
local exp_key = KEYS[3]
local events_key = KEYS[4]

local cart_id = ARGV[1]
local sku = ARGV[2]
local reason = ARGV[3]
local events_enabled = ARGV[4] == '1'
local now_ms = ARGV[5]

local member = cart_id .. ':' .. sku

local qty = redis.call('HGET', hold_key, 'qty')
if not qty then
  return {0, 1}
end
qty = tonumber(qty)

local reserved = tonumber(redis.call('HGET', inv_key, 'reserved') or '0')
local new_reserved = reserved - qty
if new_reserved < 0 then
  new_reserved = 0
end
redis.call('HSET', inv_key, 'reserved', new_reserved)

redis.call('DEL', hold_key)
redis.call('ZREM', exp_key, member)

if events_enabled then
  redis.call('XADD', events_key, '*', 'kind', 'hold_released', 'sku', sku, 'cart_id', cart_id, 'qty', qty, 'reason', reason, 'ts', now_ms)
end

return {qty, 0}
"#;

/// Recover the engine error a script signalled via `redis.error_reply`.
/// Falls back to `Unavailable` for anything that doesn't carry one of our
/// tokens (a real connection/protocol failure, not a domain outcome).
pub fn parse_script_error(err: &redis::RedisError) -> EngineError {
    let msg = err.to_string();
    if let Some(rest) = msg.split("INSUFFICIENT").nth(1) {
        let available = rest
            .trim()
            .trim_start_matches("available=")
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        return EngineError::Insufficient { available };
    }
    if msg.contains("CONFLICT") {
        return EngineError::Conflict(msg);
    }
    if msg.contains("NOTFOUND") {
        return EngineError::NotFound(msg);
    }
    if msg.contains("INTERNAL") {
        return EngineError::Internal(msg);
    }
    EngineError::Unavailable(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insufficient() {
        let err = redis::RedisError::from((
            redis::ErrorKind::ExtensionError,
            "script",
            "INSUFFICIENT available=7".to_string(),
        ));
        match parse_script_error(&err) {
            EngineError::Insufficient { available } => assert_eq!(available, 7),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_conflict() {
        let err = redis::RedisError::from((
            redis::ErrorKind::ExtensionError,
            "script",
            "CONFLICT existing_qty=3 requested_qty=1".to_string(),
        ));
        assert!(matches!(parse_script_error(&err), EngineError::Conflict(_)));
    }

    #[test]
    fn parses_not_found() {
        let err = redis::RedisError::from((
            redis::ErrorKind::ExtensionError,
            "script",
            "NOTFOUND no hold for cart-1:sku-1".to_string(),
        ));
        assert!(matches!(parse_script_error(&err), EngineError::NotFound(_)));
    }

    #[test]
    fn unrecognized_errors_become_unavailable() {
        let err = redis::RedisError::from((redis::ErrorKind::IoError, "io", "boom".to_string()));
        assert!(matches!(parse_script_error(&err), EngineError::Unavailable(_)));
    }
}
