// src/config/models.rs
use crate::proxy::BackendEndpoint;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Backend directory servers as `host:port` or `ldap://host:port`.
    pub backends: Vec<String>,

    /// Service identity the general-purpose pools bind as.
    #[serde(default = "default_proxy_dn")]
    pub proxy_dn: String,

    #[serde(default = "default_proxy_password")]
    pub proxy_password: String,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default = "default_log_level")]
    /// Level for this crate's own log output: `trace`, `debug`, `info`,
    /// `warn`, `error` or `off`.
    pub log_level: String,
}

// Hand-written so the service password never reaches the logs.
impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("listen", &self.listen)
            .field("backends", &self.backends)
            .field("proxy_dn", &self.proxy_dn)
            .field("pool", &self.pool)
            .field("metrics", &self.metrics)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ListenConfig {
    /// `host:port` the client-facing acceptor should bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Ceiling on live connections per backend. `None` opens a new
    /// connection whenever no idle one is available, up to
    /// [`UNBOUNDED_MAX_SIZE`](crate::proxy::UNBOUNDED_MAX_SIZE).
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Retry once on the next backend when the selected one cannot be
    /// connected to.
    #[serde(default)]
    pub failover: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_connections: None,
            failover: false,
        }
    }
}

impl PoolConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

impl ProxyConfig {
    pub fn new(backends: Vec<String>) -> Self {
        Self {
            listen: ListenConfig::default(),
            backends,
            proxy_dn: default_proxy_dn(),
            proxy_password: default_proxy_password(),
            pool: PoolConfig::default(),
            metrics: MetricsConfig::default(),
            log_level: default_log_level(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("At least one backend server must be configured");
        }
        self.endpoints()?;

        if self.pool.heartbeat_interval_secs == 0 {
            bail!("pool.heartbeat_interval_secs must be greater than zero");
        }
        if self.pool.connect_timeout_secs == 0 {
            bail!("pool.connect_timeout_secs must be greater than zero");
        }
        if self.pool.max_connections == Some(0) {
            bail!("pool.max_connections must be greater than zero when set");
        }
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            bail!("metrics.path must start with '/'");
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            bail!("Unknown log_level '{}'", self.log_level);
        }
        Ok(())
    }

    /// Parses the configured backend list in order.
    pub fn endpoints(&self) -> Result<Vec<BackendEndpoint>> {
        self.backends
            .iter()
            .map(|addr| {
                addr.parse::<BackendEndpoint>()
                    .with_context(|| format!("Invalid backend address '{}'", addr))
            })
            .collect()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_proxy_dn() -> String {
    "dn".to_string()
}

fn default_proxy_password() -> String {
    "password".to_string()
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_heartbeat_timeout() -> u64 {
    3
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
