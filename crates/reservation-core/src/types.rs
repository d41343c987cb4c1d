//! Domain types: identifiers, event records, and operation outcomes.
//!
//! `SkuId`/`CartId` are validated newtypes so `strict_id_validation`
//! (config §6) is enforced once, at construction, instead of being
//! re-checked at every call site.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A non-empty, trimmed SKU identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuId(String);

/// A non-empty, trimmed cart identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(String);

macro_rules! id_newtype {
    ($ty:ident, $label:expr) => {
        impl $ty {
            /// Validate and wrap a raw identifier. `strict` enables the
            /// non-empty/whitespace checks from config's
            /// `strict_id_validation`; when disabled, only emptiness after
            /// trimming is rejected (the one check the engine can never
            /// safely skip, since empty ids collide in the ACS key space).
            pub fn new(raw: impl Into<String>, strict: bool) -> Result<Self, EngineError> {
                let raw = raw.into();
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(EngineError::bad_request(format!(
                        "{} must not be empty",
                        $label
                    )));
                }
                if strict && trimmed.contains(':') {
                    return Err(EngineError::bad_request(format!(
                        "{} must not contain ':' (reserved as the ACS key separator)",
                        $label
                    )));
                }
                if strict && trimmed != raw {
                    return Err(EngineError::bad_request(format!(
                        "{} must not have leading/trailing whitespace",
                        $label
                    )));
                }
                Ok($ty(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(SkuId, "sku");
id_newtype!(CartId, "cart_id");

/// The stable composite key for a hold: `{cart_id}:{sku}`.
pub fn hold_id(cart: &CartId, sku: &SkuId) -> String {
    format!("{}:{}", cart.as_str(), sku.as_str())
}

/// Lifecycle event kinds recorded by each ACS script, per the Event Log
/// layout (`inv:events`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    HoldCreated,
    HoldExtended,
    HoldCommitted,
    HoldReleased,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::HoldCreated => "hold_created",
            EventKind::HoldExtended => "hold_extended",
            EventKind::HoldCommitted => "hold_committed",
            EventKind::HoldReleased => "hold_released",
        }
    }
}

/// Why a hold was released — distinguishes a caller-initiated release from
/// one performed by the Reaper after lease expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    Manual,
    Expired,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Manual => "manual",
            ReleaseReason::Expired => "expired",
        }
    }
}

/// One entry from the Event Log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub sku: SkuId,
    pub cart_id: CartId,
    pub qty: i64,
    pub reason: Option<ReleaseReason>,
}

/// Result of `RESERVE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveOutcome {
    pub hold_id: String,
    pub expires_at_ms: i64,
    pub available_after: i64,
    /// True when this call replayed an identical `(cart, sku, qty)` reserve.
    pub idempotent: bool,
}

/// Result of `EXTEND`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendOutcome {
    pub new_expires_at_ms: i64,
}

/// Result of `COMMIT_LOCAL` (the ACS half of commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLocalOutcome {
    pub consumed_qty: i64,
}

/// Result of `RELEASE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub released_qty: i64,
    pub absent: bool,
}

/// Result of a full `commit` (DSS decrement + ACS commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub consumed_qty: i64,
    pub new_total: i64,
}

/// Result of `snapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub total: i64,
    pub reserved: i64,
    pub available: i64,
}

impl Snapshot {
    pub fn new(total: i64, reserved: i64) -> Self {
        Self {
            total,
            reserved,
            available: total - reserved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sku_rejects_empty() {
        assert!(SkuId::new("", true).is_err());
        assert!(SkuId::new("   ", true).is_err());
    }

    #[test]
    fn sku_rejects_colon_under_strict() {
        assert!(SkuId::new("sku:123", true).is_err());
        assert!(SkuId::new("sku:123", false).is_ok());
    }

    #[test]
    fn hold_id_format() {
        let cart = CartId::new("cart-A", true).unwrap();
        let sku = SkuId::new("sku-123", true).unwrap();
        assert_eq!(hold_id(&cart, &sku), "cart-A:sku-123");
    }

    #[test]
    fn snapshot_computes_available() {
        let snap = Snapshot::new(10, 3);
        assert_eq!(snap.available, 7);
    }
}
