//! Background pool maintenance
//!
//! Tops the pool up between fetches so callers rarely have to wait on a
//! synchronous replenishment inside `get_proxy`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::proxy::pool::ProxyPool;

#[derive(Clone)]
pub struct PoolMaintainerConfig {
    /// How often to check the pool level
    pub check_interval: Duration,
}

impl Default for PoolMaintainerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
        }
    }
}

pub struct PoolMaintainer {
    pool: Arc<ProxyPool>,
    config: PoolMaintainerConfig,
}

impl PoolMaintainer {
    pub fn new(pool: Arc<ProxyPool>, config: PoolMaintainerConfig) -> Self {
        Self { pool, config }
    }

    /// Run until the shutdown flag flips (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting pool maintainer with {}s interval",
            self.config.check_interval.as_secs()
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Pool maintainer shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One maintenance pass; returns whether a replenish was attempted
    pub async fn tick(&self) -> bool {
        let level = self.pool.len();
        let min = self.pool.config().min_pool_size;

        if level >= min {
            debug!("Pool level {} is at or above minimum {}", level, min);
            return false;
        }

        info!("Pool level {} below minimum {}, replenishing", level, min);
        self.pool.replenish_if_low().await;
        info!("Pool level after maintenance: {}", self.pool.len());
        true
    }
}

/// Handle for stopping the pool maintainer
pub struct PoolMaintainerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl PoolMaintainerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for PoolMaintainerHandle {
    fn default() -> Self {
        Self::new().0
    }
}
