// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Prefix of the environment variables read by [`load_config_from_env`].
pub const ENV_PREFIX: &str = "LDAP_PROXY";

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: ProxyConfig = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
        || path.extension().and_then(|s| s.to_str()) == Some("yml")
    {
        serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(&contents).context("Failed to parse JSON config")?
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from `LDAP_PROXY__*` environment variables.
///
/// Nested keys are separated by `__` (`LDAP_PROXY__LISTEN__PORT=389`) and
/// `LDAP_PROXY__BACKENDS` takes a comma-separated address list.
pub fn load_config_from_env() -> Result<ProxyConfig> {
    let settings = ::config::Config::builder()
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("backends")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read configuration from environment")?;

    let config: ProxyConfig = settings
        .try_deserialize()
        .context("Failed to parse configuration from environment")?;

    config.validate()?;
    Ok(config)
}
