// src/lib.rs
//! Forwarding proxy for directory (LDAP) traffic.
//!
//! Each client connection gets a [`proxy::ProxySession`]. Binds are checked
//! against a backend over dedicated unauthenticated connections; every other
//! operation travels over connections bound as the proxy's service account,
//! carrying a proxied authorization control for the client's bound DN.
//! Backends are picked round-robin, and connections to each are pooled and
//! heartbeated.
pub mod config;
pub mod health;
pub mod load_balancer;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod proxy;
pub mod server;
