//! Connection pooling for the Atomic Counter Store, modeled on the
//! teacher's `cache::connection::RedisPool`: a `ConnectionManager` behind
//! an `RwLock` with bounded reconnect-with-backoff, so a transient Redis
//! blip surfaces as `unavailable` rather than poisoning the whole engine.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::{EngineError, EngineResult};

/// Add up to 50% random jitter to a retry delay so many reconnecting
/// instances losing the ACS at once don't retry in lockstep.
fn jittered(base: Duration) -> Duration {
    let extra_ms = rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 2).max(1));
    base + Duration::from_millis(extra_ms)
}

/// Configuration for ACS connection behavior.
#[derive(Debug, Clone)]
pub struct AcsConnectionConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for AcsConnectionConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
}

/// Pooled, reconnecting handle to the ACS.
#[derive(Clone)]
pub struct AcsPool {
    client: Arc<Client>,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
    config: Arc<AcsConnectionConfig>,
    state: Arc<RwLock<ConnectionState>>,
}

impl AcsPool {
    pub async fn connect(config: AcsConnectionConfig) -> EngineResult<Self> {
        let client = Client::open(&config.url[..])
            .map_err(|e| EngineError::unavailable(format!("invalid ACS url: {e}")))?;

        let pool = Self {
            client: Arc::new(client),
            manager: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(ConnectionState::Failed)),
        };

        pool.reconnect().await?;
        info!(url = %pool.config.url, "ACS pool created");
        Ok(pool)
    }

    /// Borrow a live `ConnectionManager`. `ConnectionManager` is internally
    /// `Clone` + auto-reconnecting on command failure, so handing out a
    /// clone per call is the normal usage pattern, not a leak.
    pub async fn connection(&self) -> EngineResult<ConnectionManager> {
        let state = *self.state.read().await;
        match state {
            ConnectionState::Connected => {
                if let Some(manager) = self.manager.read().await.as_ref() {
                    return Ok(manager.clone());
                }
                self.reconnect().await?;
                self.connection_after_reconnect().await
            }
            ConnectionState::Reconnecting => {
                tokio::time::sleep(self.config.retry_delay).await;
                self.connection_after_reconnect().await
            }
            ConnectionState::Failed => {
                self.reconnect().await?;
                self.connection_after_reconnect().await
            }
        }
    }

    async fn connection_after_reconnect(&self) -> EngineResult<ConnectionManager> {
        self.manager
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| EngineError::unavailable("no ACS connection available"))
    }

    async fn reconnect(&self) -> EngineResult<()> {
        *self.state.write().await = ConnectionState::Reconnecting;

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, "ACS reconnect attempt");

            match ConnectionManager::new((*self.client).clone()).await {
                Ok(manager) => {
                    *self.manager.write().await = Some(manager);
                    *self.state.write().await = ConnectionState::Connected;
                    info!(attempt, "ACS reconnected");
                    return Ok(());
                }
                Err(e) => {
                    error!(attempt, error = %e, "ACS connection attempt failed");
                    if attempt >= self.config.max_retries {
                        *self.state.write().await = ConnectionState::Failed;
                        return Err(EngineError::unavailable(format!(
                            "ACS unreachable after {attempt} attempts: {e}"
                        )));
                    }
                    tokio::time::sleep(jittered(self.config.retry_delay)).await;
                }
            }
        }
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| EngineError::unavailable(format!("ACS ping failed: {e}")))?;
        if pong != "PONG" {
            return Err(EngineError::unavailable("ACS ping returned unexpected reply"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_never_goes_below_base() {
        for _ in 0..50 {
            let d = jittered(Duration::from_millis(200));
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn jittered_handles_sub_millisecond_base() {
        let d = jittered(Duration::from_millis(1));
        assert!(d >= Duration::from_millis(1));
    }
}
