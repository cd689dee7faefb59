// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use super::listener::ProxyListener;
use crate::config::ProxyConfig;
use crate::health::HealthChecker;
use crate::load_balancer::LoadBalancer;
use crate::metrics::MetricsRegistry;
use crate::proxy::{BackendConnector, ConnectionIdentity, ConnectionPool};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::info;

/// Pool label for connections bound as the proxy service identity.
pub const GENERAL_POOL: &str = "general";
/// Pool label for unauthenticated connections reserved for client binds.
pub const BIND_POOL: &str = "bind";

/// Builder pattern so callers can inject the backend codec and metrics.
pub struct ServerBuilder {
    config: ProxyConfig,
    connector: Option<Arc<dyn BackendConnector>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl ServerBuilder {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            connector: None,
            metrics: None,
        }
    }

    /// Inject the connector used to reach backend servers.
    pub fn with_connector(mut self, connector: Arc<dyn BackendConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_metrics(mut self, registry: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Creates one general and one bind pool per configured backend, in
    /// configuration order, and the two round-robin balancers over them.
    pub fn build(self) -> Result<ProxyListener> {
        let connector = self
            .connector
            .ok_or_else(|| anyhow!("backend connector must be set via with_connector()"))?;
        self.config.validate()?;

        let collector = self.metrics.as_ref().map(|registry| registry.collector());
        let service = ConnectionIdentity::Service {
            dn: self.config.proxy_dn.clone(),
            password: self.config.proxy_password.clone(),
        };

        let mut general_pools = Vec::new();
        let mut bind_pools = Vec::new();
        for endpoint in self.config.endpoints()? {
            info!(
                "Registering remote ldap server '{}' with port {}.",
                endpoint.host(),
                endpoint.port()
            );
            general_pools.push(Arc::new(ConnectionPool::new(
                GENERAL_POOL,
                endpoint.clone(),
                service.clone(),
                connector.clone(),
                self.config.pool.clone(),
                collector.clone(),
            )?));
            bind_pools.push(Arc::new(ConnectionPool::new(
                BIND_POOL,
                endpoint,
                ConnectionIdentity::Unauthenticated,
                connector.clone(),
                self.config.pool.clone(),
                collector.clone(),
            )?));
        }

        let all_pools: Vec<_> = general_pools.iter().chain(bind_pools.iter()).cloned().collect();
        let health = Arc::new(HealthChecker::new(self.config.pool.clone(), all_pools));

        let general = Arc::new(
            LoadBalancer::round_robin(GENERAL_POOL, general_pools).with_failover(self.config.pool.failover),
        );
        let bind = Arc::new(
            LoadBalancer::round_robin(BIND_POOL, bind_pools).with_failover(self.config.pool.failover),
        );

        Ok(ProxyListener::new(
            general,
            bind,
            health,
            self.metrics,
            self.config.metrics.clone(),
            self.config.listen.clone(),
        ))
    }
}
