// src/load_balancer/round_robin.rs
use crate::load_balancer::SelectionStrategy;
use crate::proxy::ConnectionPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out pools in order, wrapping around. The cursor is a single
/// atomic counter, so concurrent callers never block each other.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next selection over `len` pools will use, advancing the cursor.
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % len)
    }
}

impl SelectionStrategy for RoundRobinBalancer {
    fn select(&self, pools: &[Arc<ConnectionPool>]) -> Option<Arc<ConnectionPool>> {
        let index = self.next_index(pools.len())?;
        Some(pools[index].clone())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
