//! ACS key-space layout, per the persisted state layout table (spec §6).

use crate::types::{CartId, SkuId};

/// `inv:{sku}` — hash with fields `total`, `reserved`.
pub fn inventory_key(sku: &SkuId) -> String {
    format!("inv:{}", sku.as_str())
}

/// `hold:{cart_id}:{sku}` — hash with fields `qty`, `expires_at`, `created_at`.
pub fn hold_key(cart: &CartId, sku: &SkuId) -> String {
    format!("hold:{}:{}", cart.as_str(), sku.as_str())
}

/// `holds:exp` — zset, score = `expires_at` ms composed with an insertion
/// sequence (see [`HOLDS_SEQ_KEY`]) so same-millisecond ties sort in
/// insertion order, member = `{cart_id}:{sku}`.
pub const EXPIRY_INDEX_KEY: &str = "holds:exp";

/// `holds:seq` — a plain `INCR` counter the `RESERVE`/`EXTEND` scripts draw
/// from to break expiry ties deterministically (spec §4.1: "ties between
/// two holds expiring in the same millisecond are processed in insertion
/// order by the reaper").
pub const HOLDS_SEQ_KEY: &str = "holds:seq";

/// `inv:events` default stream name (overridable via config).
pub const DEFAULT_EVENTS_STREAM: &str = "inv:events";

/// `{cart_id}:{sku}` — the expiry-index member / hold_id.
pub fn member(cart: &CartId, sku: &SkuId) -> String {
    crate::types::hold_id(cart, sku)
}

/// Split a `{cart_id}:{sku}` member back into its parts. SKUs/cart ids are
/// validated to never contain `:` under `strict_id_validation`, so the
/// split is unambiguous in that mode; in lenient mode we split on the
/// first `:` since cart ids are assigned by the caller, not the SKU.
pub fn split_member(raw: &str) -> Option<(String, String)> {
    raw.split_once(':').map(|(a, b)| (a.to_string(), b.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let sku = SkuId::new("sku-1", true).unwrap();
        let cart = CartId::new("cart-1", true).unwrap();
        assert_eq!(inventory_key(&sku), "inv:sku-1");
        assert_eq!(hold_key(&cart, &sku), "hold:cart-1:sku-1");
        assert_eq!(member(&cart, &sku), "cart-1:sku-1");
    }

    #[test]
    fn split_member_roundtrips() {
        let (cart, sku) = split_member("cart-1:sku-1").unwrap();
        assert_eq!(cart, "cart-1");
        assert_eq!(sku, "sku-1");
    }
}
