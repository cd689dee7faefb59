// src/health/checker.rs
use crate::config::PoolConfig;
use crate::proxy::ConnectionPool;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodically heartbeats the idle connections of every pool.
pub struct HealthChecker {
    config: PoolConfig,
    pools: Vec<Arc<ConnectionPool>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HeartbeatResult {
    pub pool: &'static str,
    pub endpoint: String,
    pub checked: usize,
    pub failed: usize,
}

impl HealthChecker {
    pub fn new(config: PoolConfig, pools: Vec<Arc<ConnectionPool>>) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Self {
            config,
            pools,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut interval = interval(self.config.heartbeat_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting heartbeat over {} pools with interval: {:?}",
            self.pools.len(),
            self.config.heartbeat_interval()
        );

        // The first tick fires immediately, before any connection exists.
        interval.tick().await;

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.check_all_pools().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Heartbeat checker shutting down");
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Runs one heartbeat sweep over every pool concurrently.
    pub async fn check_all_pools(&self) -> Vec<HeartbeatResult> {
        let checks = self.pools.iter().map(|pool| async move {
            let outcome = pool.heartbeat_idle().await;
            HeartbeatResult {
                pool: pool.name(),
                endpoint: pool.endpoint().id(),
                checked: outcome.checked,
                failed: outcome.failed,
            }
        });
        let results = futures::future::join_all(checks).await;

        let mut checked = 0;
        let mut failed = 0;
        for result in &results {
            checked += result.checked;
            failed += result.failed;
            if result.failed > 0 {
                warn!(
                    pool = result.pool,
                    endpoint = %result.endpoint,
                    "{} of {} idle connections failed heartbeat",
                    result.failed,
                    result.checked
                );
            }
        }

        debug!("Heartbeat complete: {} checked, {} dropped", checked, failed);
        results
    }
}
