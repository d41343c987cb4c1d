//! Postgres-backed [`DurableStock`], modeled on the teacher's
//! `repository::postgres` pair: a thin pool handle plus a repository that
//! binds queries against it.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use crate::durable_stock::DurableStock;
use crate::error::{EngineError, EngineResult};
use crate::types::SkuId;

/// Postgres connection handle for the Durable Stock Store.
#[derive(Clone)]
pub struct PostgresDb {
    pool: Pool<Postgres>,
}

impl PostgresDb {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// Create the Postgres connection pool backing the DSS.
pub async fn create_pool(dsn: &str, max_connections: u32) -> crate::error::Result<Pool<Postgres>> {
    use sqlx::postgres::PgPoolOptions;

    tracing::info!("connecting to durable stock store");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(dsn)
        .await?;
    tracing::info!("durable stock store connected");
    Ok(pool)
}

/// Run the DSS schema migration. The engine owns exactly one table: the
/// authoritative `total` per SKU.
pub async fn run_migrations(pool: &Pool<Postgres>) -> crate::error::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inventory (
            sku TEXT PRIMARY KEY,
            total BIGINT NOT NULL CHECK (total >= 0),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// `DurableStock` backed by the `inventory` table.
#[derive(Clone)]
pub struct PostgresStock {
    db: PostgresDb,
}

impl PostgresStock {
    pub fn new(db: PostgresDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DurableStock for PostgresStock {
    async fn conditional_decrement(&self, sku: &SkuId, qty: i64) -> EngineResult<Option<i64>> {
        if qty <= 0 {
            return Err(EngineError::bad_request("qty must be positive"));
        }

        // `RETURNING total` makes the post-decrement read atomic with the
        // decrement itself, so a concurrent commit against the same SKU from
        // a different cart can never be reported as this commit's result.
        let row = sqlx::query(
            "UPDATE inventory SET total = total - $1, updated_at = now() \
             WHERE sku = $2 AND total >= $1 \
             RETURNING total",
        )
        .bind(qty)
        .bind(sku.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| EngineError::unavailable(format!("durable store decrement failed: {e}")))?;

        Ok(row.map(|r| r.get::<i64, _>("total")))
    }

    async fn get_total(&self, sku: &SkuId) -> EngineResult<Option<i64>> {
        let row = sqlx::query("SELECT total FROM inventory WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| EngineError::unavailable(format!("durable store read failed: {e}")))?;

        Ok(row.map(|r| r.get::<i64, _>("total")))
    }

    async fn seed_total(&self, sku: &SkuId, total: i64) -> EngineResult<()> {
        if total < 0 {
            return Err(EngineError::bad_request("total must be non-negative"));
        }

        sqlx::query(
            "INSERT INTO inventory (sku, total) VALUES ($1, $2) \
             ON CONFLICT (sku) DO UPDATE SET total = EXCLUDED.total, updated_at = now()",
        )
        .bind(sku.as_str())
        .bind(total)
        .execute(self.db.pool())
        .await
        .map_err(|e| EngineError::unavailable(format!("durable store seed failed: {e}")))?;

        Ok(())
    }

    async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.db.pool())
            .await
            .map_err(|e| EngineError::unavailable(format!("durable store ping failed: {e}")))?;
        Ok(())
    }
}
