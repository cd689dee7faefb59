// src/load_balancer/algorithm.rs
use crate::proxy::ConnectionPool;
use std::sync::Arc;

/// Picks which backend pool serves the next connection request.
pub trait SelectionStrategy: Send + Sync {
    fn select(&self, pools: &[Arc<ConnectionPool>]) -> Option<Arc<ConnectionPool>>;

    fn name(&self) -> &'static str;
}
