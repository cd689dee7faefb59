// src/proxy/mod.rs
mod backend;
mod error;
mod pool;
mod session;
mod sink;

pub use backend::{
    BackendConnection, BackendConnector, BackendEndpoint, BackendError, EndpointParseError,
    DEFAULT_LDAP_PORT,
};
pub use error::{PolicyViolation, ProxyError};
pub use pool::{
    ConnectError, ConnectionIdentity, ConnectionPool, HeartbeatOutcome, PoolStats,
    PooledConnection, UNBOUNDED_MAX_SIZE,
};
pub use session::{Dispatch, ProxySession, SessionState};
pub use sink::ResponseSink;
