//! Operational CLI for the reservation engine: run the Reaper daemon,
//! seed stock, and drive `reserve`/`extend`/`commit`/`release`/`snapshot`/
//! `events` by hand — the same `clap`-derived, `tracing_subscriber`-backed
//! shape as the teacher's `rcommerce`/`rcommerce-cli` binaries, trimmed to
//! this engine's single concern.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use reservation_core::{
    AcsConnectionConfig, AcsPool, CartId, CommitRetryConfig, EngineConfig, PostgresDb,
    PostgresStock, Reaper, ReaperConfig, RedisCounterStore, ReservationEngine, Result, SkuId,
};

#[derive(Parser)]
#[command(name = "reservation-cli")]
#[command(about = "Real-time inventory reservation engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log level (e.g. info, debug)")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Reaper sweep loop until interrupted
    Serve,

    /// Seed (or top up) a SKU's authoritative total in the durable stock store
    Seed {
        #[arg(help = "SKU identifier")]
        sku: String,
        #[arg(help = "Total units")]
        total: i64,
    },

    /// Reserve units for a cart
    Reserve {
        sku: String,
        cart_id: String,
        qty: i64,
        #[arg(long, help = "Hold TTL in seconds, defaults to config")]
        ttl_secs: Option<i64>,
    },

    /// Extend an existing hold's lease
    Extend {
        sku: String,
        cart_id: String,
        #[arg(help = "Seconds to add to the current lease")]
        add_secs: i64,
    },

    /// Commit a hold: decrement the durable total and release the ACS hold
    Commit { sku: String, cart_id: String },

    /// Release a hold without committing
    Release { sku: String, cart_id: String },

    /// Show a SKU's current {total, reserved, available}
    Snapshot { sku: String },

    /// Show the most recent Event Log entries
    Events {
        #[arg(default_value_t = 50)]
        limit: usize,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path.to_str().unwrap())?,
        None => EngineConfig::from_env()?,
    };

    info!(version = reservation_core::VERSION, "starting reservation-cli");

    if let Commands::Config = cli.command {
        println!("{config:#?}");
        return Ok(());
    }

    let engine = build_engine(&config).await?;

    match cli.command {
        Commands::Serve => {
            let counter_store = engine_counter_store(&config).await?;
            let (reaper, shutdown_tx) = Reaper::new(
                counter_store,
                ReaperConfig {
                    interval: std::time::Duration::from_millis(config.reaper_interval_ms),
                    batch: config.reaper_batch,
                },
            );
            let handle = reaper.start();

            tokio::signal::ctrl_c()
                .await
                .map_err(reservation_core::Error::Io)?;
            info!("shutdown signal received, draining current sweep");
            shutdown_tx.send(true).ok();
            handle.await.ok();
        }

        Commands::Seed { sku, total } => {
            let sku = SkuId::new(sku, config.strict_id_validation)?;
            engine.seed_total(&sku, total).await?;
            println!("seeded sku={sku} total={total}");
        }

        Commands::Reserve {
            sku,
            cart_id,
            qty,
            ttl_secs,
        } => {
            let sku = SkuId::new(sku, config.strict_id_validation)?;
            let cart = CartId::new(cart_id, config.strict_id_validation)?;
            let ttl_ms = ttl_secs.map(|s| s * 1000);
            let outcome = engine.reserve(&sku, &cart, qty, ttl_ms).await?;
            println!("{outcome:#?}");
        }

        Commands::Extend {
            sku,
            cart_id,
            add_secs,
        } => {
            let sku = SkuId::new(sku, config.strict_id_validation)?;
            let cart = CartId::new(cart_id, config.strict_id_validation)?;
            let outcome = engine.extend(&sku, &cart, add_secs * 1000).await?;
            println!("{outcome:#?}");
        }

        Commands::Commit { sku, cart_id } => {
            let sku = SkuId::new(sku, config.strict_id_validation)?;
            let cart = CartId::new(cart_id, config.strict_id_validation)?;
            let outcome = engine.commit(&sku, &cart).await?;
            println!("{outcome:#?}");
        }

        Commands::Release { sku, cart_id } => {
            let sku = SkuId::new(sku, config.strict_id_validation)?;
            let cart = CartId::new(cart_id, config.strict_id_validation)?;
            let outcome = engine.release(&sku, &cart).await?;
            println!("{outcome:#?}");
        }

        Commands::Snapshot { sku } => {
            let sku = SkuId::new(sku, config.strict_id_validation)?;
            let snapshot = engine.snapshot(&sku).await?;
            println!("{snapshot:#?}");
        }

        Commands::Events { limit } => {
            let events = engine.events(limit).await?;
            for event in events {
                println!("{event:?}");
            }
        }

        Commands::Config => unreachable!("handled above"),
    }

    Ok(())
}

async fn engine_counter_store(
    config: &EngineConfig,
) -> Result<Arc<RedisCounterStore>> {
    let acs_pool = AcsPool::connect(AcsConnectionConfig {
        url: config.counter_store_url.clone(),
        max_retries: config.acs_max_retries,
        retry_delay: std::time::Duration::from_millis(config.acs_retry_delay_ms),
    })
    .await?;

    Ok(Arc::new(RedisCounterStore::new(
        acs_pool,
        config.events_enabled,
        config.events_stream_name.clone(),
    )))
}

async fn build_engine(config: &EngineConfig) -> Result<ReservationEngine> {
    let counter_store = engine_counter_store(config).await?;

    let pg_pool =
        reservation_core::dss::create_pool(&config.durable_store_dsn, config.durable_pool_size)
            .await?;
    reservation_core::dss::run_migrations(&pg_pool).await?;
    let durable_stock = Arc::new(PostgresStock::new(PostgresDb::new(pg_pool)));

    Ok(ReservationEngine::new(
        counter_store,
        durable_stock,
        config.default_hold_ttl_ms(),
        CommitRetryConfig {
            max_retries: config.commit_max_retries,
            retry_delay: std::time::Duration::from_millis(config.commit_retry_delay_ms),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_reserve_subcommand() {
        let cli = Cli::parse_from([
            "reservation-cli",
            "reserve",
            "widget",
            "cart-1",
            "3",
        ]);
        assert!(matches!(cli.command, Commands::Reserve { .. }));
    }

    #[test]
    fn cli_parses_serve_subcommand() {
        let cli = Cli::parse_from(["reservation-cli", "serve"]);
        assert!(matches!(cli.command, Commands::Serve));
    }
}
