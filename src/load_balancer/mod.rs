// src/load_balancer/mod.rs
mod algorithm;
mod round_robin;

pub use algorithm::SelectionStrategy;
pub use round_robin::RoundRobinBalancer;

use crate::proxy::{ConnectError, ConnectionPool, PooledConnection};
use std::sync::Arc;
use tracing::warn;

/// An ordered set of backend pools behind one selection strategy.
///
/// Selection does not look at backend health: a dead backend shows up as a
/// failed `acquire` on its pool. With failover enabled that failure is
/// retried once on the pool that follows it; otherwise it is returned.
pub struct LoadBalancer {
    name: &'static str,
    pools: Vec<Arc<ConnectionPool>>,
    strategy: Arc<dyn SelectionStrategy>,
    failover: bool,
}

impl LoadBalancer {
    pub fn new(
        name: &'static str,
        pools: Vec<Arc<ConnectionPool>>,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> Self {
        Self {
            name,
            pools,
            strategy,
            failover: false,
        }
    }

    pub fn round_robin(name: &'static str, pools: Vec<Arc<ConnectionPool>>) -> Self {
        Self::new(name, pools, Arc::new(RoundRobinBalancer::new()))
    }

    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn strategy(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn pools(&self) -> &[Arc<ConnectionPool>] {
        &self.pools
    }

    pub fn next_pool(&self) -> Result<Arc<ConnectionPool>, ConnectError> {
        self.strategy
            .select(&self.pools)
            .ok_or(ConnectError::NoBackends)
    }

    /// Acquires a connection from the next pool in selection order.
    pub async fn acquire(&self) -> Result<PooledConnection, ConnectError> {
        let pool = self.next_pool()?;
        match pool.acquire().await {
            Ok(conn) => Ok(conn),
            Err(err) if self.failover && self.pools.len() > 1 => {
                let fallback = self.pool_after(&pool);
                warn!(
                    balancer = self.name,
                    failed = %pool.endpoint(),
                    fallback = %fallback.endpoint(),
                    error = %err,
                    "Failing over to next backend"
                );
                fallback.acquire().await
            }
            Err(err) => Err(err),
        }
    }

    fn pool_after(&self, pool: &Arc<ConnectionPool>) -> Arc<ConnectionPool> {
        let position = self
            .pools
            .iter()
            .position(|p| Arc::ptr_eq(p, pool))
            .unwrap_or(0);
        self.pools[(position + 1) % self.pools.len()].clone()
    }

    pub async fn close(&self) {
        futures::future::join_all(self.pools.iter().map(|pool| pool.close())).await;
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("name", &self.name)
            .field("strategy", &self.strategy.name())
            .field("pools", &self.pools.len())
            .field("failover", &self.failover)
            .finish()
    }
}
