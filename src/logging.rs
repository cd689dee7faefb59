// src/logging.rs
use crate::config::ProxyConfig;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise this crate logs at `level` and
/// everything else at `info`.
pub fn init(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("info,ldap_proxy={}", level.to_ascii_lowercase()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(anyhow::Error::msg)?;
    Ok(())
}

/// [`init`] at the configured `log_level`.
pub fn init_from(config: &ProxyConfig) -> Result<()> {
    init(&config.log_level)
}
