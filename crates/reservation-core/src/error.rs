//! Error taxonomy for the reservation engine.
//!
//! Two layers, mirroring the split the rest of this crate keeps between
//! domain outcomes and infrastructure failures: [`EngineError`] is the
//! transport-agnostic taxonomy from the operation surface (bad_request,
//! insufficient, conflict, not_found, unavailable, internal); [`Error`]
//! wraps infrastructure failures (Postgres, Redis, config parsing) that
//! don't fit that taxonomy directly.

use crate::types::SkuId;

/// Result alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result alias for infrastructure-level operations (pools, config, migrations).
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy for reservation operations (`reserve`/`extend`/`commit`/`release`/
/// `snapshot`/`events`). Every variant maps directly onto a row of the
/// operation surface table.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Caller violated an input constraint (empty id, non-positive qty/ttl).
    /// Never retried by the engine.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Reservation denied because there isn't enough headroom. Carries the
    /// availability observed at decision time.
    #[error("insufficient stock: available={available}")]
    Insufficient {
        /// `total - reserved` at the moment the script ran.
        available: i64,
    },

    /// Idempotency collision (reserve replay with a different qty) or a
    /// commit race against external DSS consumption.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No hold exists for the given `(cart_id, sku)` pair.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient ACS/DSS I/O failure. Caller may retry; the engine itself
    /// only retries the DSS-settled tail of commit (§ commit protocol).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// An invariant (I1–I6) was violated or an overflow occurred. A bug,
    /// not a recoverable condition — callers should not retry.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        EngineError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        EngineError::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    pub fn conflict_existing_qty(sku: &SkuId, existing_qty: i64, requested_qty: i64) -> Self {
        EngineError::Conflict(format!(
            "hold for sku={} exists with qty={}, requested qty={}",
            sku.as_str(),
            existing_qty,
            requested_qty
        ))
    }

    /// Stable category name, useful for metrics/log fields the way
    /// `rcommerce_core::Error::category` is used for monitoring.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::BadRequest(_) => "bad_request",
            EngineError::Insufficient { .. } => "insufficient",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Whether a caller may safely retry this operation.
    pub fn retryable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_) | EngineError::Insufficient { .. })
    }
}

/// Infrastructure-level error: connection setup, configuration, migrations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("durable store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("counter store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
