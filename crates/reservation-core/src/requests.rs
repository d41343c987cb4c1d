//! Request DTOs for the six engine operations. These derive `Validate` the
//! way the teacher's `models::cart` inputs do, so a future transport layer
//! (out of scope here) can validate input shape before it ever reaches
//! [`crate::engine::ReservationEngine`] — the engine itself only ever sees
//! already-validated [`SkuId`]/[`CartId`] newtypes.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::EngineError;
use crate::types::{CartId, SkuId};

/// Raw input for `reserve`. `sku`/`cart_id` are validated into
/// [`SkuId`]/[`CartId`] by [`ReserveRequest::into_parts`], so
/// `strict_id_validation` is applied exactly once per call.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReserveRequest {
    #[validate(length(min = 1, max = 256))]
    pub sku: String,
    #[validate(length(min = 1, max = 256))]
    pub cart_id: String,
    #[validate(range(min = 1))]
    pub qty: i64,
    #[validate(range(min = 1))]
    pub ttl_ms: Option<i64>,
}

impl ReserveRequest {
    pub fn into_parts(self, strict: bool) -> Result<(SkuId, CartId, i64, Option<i64>), EngineError> {
        self.validate()
            .map_err(|e| EngineError::bad_request(e.to_string()))?;
        Ok((
            SkuId::new(self.sku, strict)?,
            CartId::new(self.cart_id, strict)?,
            self.qty,
            self.ttl_ms,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExtendRequest {
    #[validate(length(min = 1, max = 256))]
    pub sku: String,
    #[validate(length(min = 1, max = 256))]
    pub cart_id: String,
    #[validate(range(min = 1))]
    pub add_ms: i64,
}

impl ExtendRequest {
    pub fn into_parts(self, strict: bool) -> Result<(SkuId, CartId, i64), EngineError> {
        self.validate()
            .map_err(|e| EngineError::bad_request(e.to_string()))?;
        Ok((
            SkuId::new(self.sku, strict)?,
            CartId::new(self.cart_id, strict)?,
            self.add_ms,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CommitRequest {
    #[validate(length(min = 1, max = 256))]
    pub sku: String,
    #[validate(length(min = 1, max = 256))]
    pub cart_id: String,
}

impl CommitRequest {
    pub fn into_parts(self, strict: bool) -> Result<(SkuId, CartId), EngineError> {
        self.validate()
            .map_err(|e| EngineError::bad_request(e.to_string()))?;
        Ok((
            SkuId::new(self.sku, strict)?,
            CartId::new(self.cart_id, strict)?,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReleaseRequest {
    #[validate(length(min = 1, max = 256))]
    pub sku: String,
    #[validate(length(min = 1, max = 256))]
    pub cart_id: String,
}

impl ReleaseRequest {
    pub fn into_parts(self, strict: bool) -> Result<(SkuId, CartId), EngineError> {
        self.validate()
            .map_err(|e| EngineError::bad_request(e.to_string()))?;
        Ok((
            SkuId::new(self.sku, strict)?,
            CartId::new(self.cart_id, strict)?,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SnapshotRequest {
    #[validate(length(min = 1, max = 256))]
    pub sku: String,
}

impl SnapshotRequest {
    pub fn into_parts(self, strict: bool) -> Result<SkuId, EngineError> {
        self.validate()
            .map_err(|e| EngineError::bad_request(e.to_string()))?;
        SkuId::new(self.sku, strict)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EventsRequest {
    #[validate(range(min = 1, max = 10_000))]
    pub limit: usize,
}

impl Default for EventsRequest {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_request_rejects_non_positive_qty() {
        let req = ReserveRequest {
            sku: "widget".into(),
            cart_id: "cart-1".into(),
            qty: 0,
            ttl_ms: None,
        };
        assert!(req.into_parts(true).is_err());
    }

    #[test]
    fn reserve_request_accepts_valid_input() {
        let req = ReserveRequest {
            sku: "widget".into(),
            cart_id: "cart-1".into(),
            qty: 3,
            ttl_ms: Some(30_000),
        };
        let (sku, cart, qty, ttl_ms) = req.into_parts(true).unwrap();
        assert_eq!(sku.as_str(), "widget");
        assert_eq!(cart.as_str(), "cart-1");
        assert_eq!(qty, 3);
        assert_eq!(ttl_ms, Some(30_000));
    }
}
