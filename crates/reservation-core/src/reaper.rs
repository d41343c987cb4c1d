//! The Reaper: a periodic sweep that releases holds past their lease,
//! shaped the same way the teacher's `jobs::scheduler::JobScheduler` runs
//! its background loop — `tokio::spawn`, a config struct, a `run` loop
//! gated by a shutdown signal — but trimmed to the single responsibility
//! spec gives it (no generic job queue, no cron).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::counter_store::CounterStore;
use crate::types::ReleaseReason;

/// Reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub batch: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            batch: 128,
        }
    }
}

/// Sweeps the ACS expiry index and releases due holds.
pub struct Reaper {
    store: Arc<dyn CounterStore>,
    config: ReaperConfig,
    shutdown: watch::Receiver<bool>,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn CounterStore>,
        config: ReaperConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                store,
                config,
                shutdown: rx,
            },
            tx,
        )
    }

    /// Spawn the sweep loop. Returns the join handle; drop the paired
    /// `watch::Sender` (or send `true`) to request a clean shutdown —
    /// the loop finishes its current batch before exiting.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch = self.config.batch,
            "starting reaper"
        );
        tokio::spawn(async move { self.run().await })
    }

    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                info!("reaper shutting down");
                return;
            }

            match self.sweep_once().await {
                Ok(released) if released > 0 => {
                    debug!(released, "reaper swept expired holds");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "reaper sweep failed, will retry next interval");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("reaper shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Run exactly one sweep; exposed separately so tests can drive the
    /// reaper deterministically instead of racing a timer.
    pub async fn sweep_once(&self) -> crate::error::EngineResult<usize> {
        let now_ms = Utc::now().timestamp_millis();
        let due = self.store.due_holds(now_ms, self.config.batch).await?;

        let mut released = 0;
        for (cart, sku) in due {
            match self.store.release(&sku, &cart, ReleaseReason::Expired).await {
                Ok(outcome) => {
                    if !outcome.absent {
                        released += 1;
                    }
                }
                Err(e) => {
                    warn!(sku = %sku, cart_id = %cart, error = %e, "reaper release failed");
                }
            }
        }

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCounterStore;
    use crate::types::{CartId, SkuId};

    fn sku(s: &str) -> SkuId {
        SkuId::new(s, true).unwrap()
    }

    fn cart(s: &str) -> CartId {
        CartId::new(s, true).unwrap()
    }

    fn reaper_against(store: Arc<InMemoryCounterStore>) -> Reaper {
        Reaper {
            store,
            config: ReaperConfig {
                interval: Duration::from_millis(1),
                batch: 128,
            },
            shutdown: watch::channel(false).1,
        }
    }

    /// Scenario 3 (abandon): a hold past its lease is released by the next
    /// sweep, and re-sweeping the same window is a no-op (idempotent).
    #[tokio::test]
    async fn sweep_releases_expired_holds_and_is_idempotent() {
        let store = Arc::new(InMemoryCounterStore::new(true));
        let sku = sku("widget");
        let now_ms = Utc::now().timestamp_millis();

        // A lease with plenty of runway: not due yet.
        store
            .reserve(&sku, &cart("cart-x"), 1, 60_000, now_ms)
            .await
            .unwrap();
        let reaper = reaper_against(store.clone());
        assert_eq!(reaper.sweep_once().await.unwrap(), 0);
        assert_eq!(store.snapshot(&sku).await.unwrap().reserved, 1);

        // A hold whose lease already expired (ttl in the past) is due now.
        store
            .release(&sku, &cart("cart-x"), ReleaseReason::Manual)
            .await
            .unwrap();
        store
            .reserve(&sku, &cart("cart-y"), 1, 1, now_ms - 10_000)
            .await
            .unwrap();

        let released = reaper.sweep_once().await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(store.snapshot(&sku).await.unwrap().reserved, 0);

        // Double-sweep is idempotent: nothing left to release.
        assert_eq!(reaper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_once_orders_releases_by_expiry() {
        let store = Arc::new(InMemoryCounterStore::new(false));
        let sku = sku("widget");
        let now_ms = Utc::now().timestamp_millis();

        store
            .reserve(&sku, &cart("cart-a"), 1, 1, now_ms - 10_000)
            .await
            .unwrap();
        store
            .reserve(&sku, &cart("cart-b"), 1, 1, now_ms - 20_000)
            .await
            .unwrap();

        let due = store.due_holds(now_ms, 128).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].0.as_str(), "cart-b", "earlier deadline sweeps first");
        assert_eq!(due[1].0.as_str(), "cart-a");

        let reaper = reaper_against(store.clone());
        assert_eq!(reaper.sweep_once().await.unwrap(), 2);
        assert_eq!(store.snapshot(&sku).await.unwrap().reserved, 0);
    }
}
