// src/proxy/backend.rs
use super::sink::ResponseSink;
use crate::protocol::{OperationResult, Request};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Port assumed for `ldap://` URLs that do not name one.
pub const DEFAULT_LDAP_PORT: u16 = 389;

/// Address of one backend directory server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendEndpoint {
    host: String,
    port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` label used in logs and metrics.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointParseError {
    #[error("missing port in '{0}', expected host:port")]
    MissingPort(String),

    #[error("invalid port in '{0}'")]
    InvalidPort(String),

    #[error("missing host in '{0}'")]
    MissingHost(String),

    #[error("unsupported scheme '{0}', only ldap:// is accepted")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FromStr for BackendEndpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.contains("://") {
            let url = Url::parse(s)?;
            if url.scheme() != "ldap" {
                return Err(EndpointParseError::UnsupportedScheme(url.scheme().to_string()));
            }
            let host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| EndpointParseError::MissingHost(s.to_string()))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            return Ok(Self::new(host, url.port().unwrap_or(DEFAULT_LDAP_PORT)));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointParseError::MissingHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Failure of an established backend connection.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by backend")]
    Closed,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Opens transport connections to backend servers.
///
/// Implemented by the protocol codec; the pool decides when to call it and
/// which identity the resulting connection is bound as.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &BackendEndpoint,
    ) -> Result<Box<dyn BackendConnection>, BackendError>;
}

/// One live connection to a backend server.
#[async_trait]
pub trait BackendConnection: Send {
    /// Sends `request` and waits for its terminal result.
    ///
    /// Search entries, references and intermediate responses must be pushed
    /// to `sink` as they arrive. A non-success result code is an `Ok`: the
    /// connection is still usable. `Err` means the connection is not.
    async fn execute(
        &mut self,
        request: Request,
        sink: &ResponseSink,
    ) -> Result<OperationResult, BackendError>;

    /// No-op round trip used to keep idle connections alive.
    async fn heartbeat(&mut self) -> Result<(), BackendError>;

    /// Graceful shutdown hook. The pool calls it for every connection it
    /// retires: idle ones when it closes, and ones discarded after a failed
    /// operation or heartbeat.
    async fn close(&mut self) {}
}
