// src/proxy/error.rs
use super::backend::BackendError;
use super::pool::ConnectError;
use crate::protocol::{OperationResult, ResultCode};

/// Requests the proxy refuses to forward.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("non-SIMPLE authentication not supported: {0}")]
    NonSimpleBind(String),

    #[error("Cancel extended request operation not supported")]
    Cancel,

    #[error("StartTLS extended request operation not supported")]
    StartTls,

    #[error("Abandon operation not supported")]
    Abandon,
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error("No backend connection available: {0}")]
    Connect(#[from] ConnectError),

    #[error("Backend connection lost: {0}")]
    Backend(BackendError),

    #[error("Internal proxy error: {0}")]
    LocalFault(String),
}

impl From<BackendError> for ProxyError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Protocol(message) => {
                ProxyError::LocalFault(format!("backend protocol violation: {message}"))
            }
            other => ProxyError::Backend(other),
        }
    }
}

impl ProxyError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            ProxyError::Policy(_) => ResultCode::PROTOCOL_ERROR,
            ProxyError::Connect(_) | ProxyError::Backend(_) => ResultCode::UNAVAILABLE,
            ProxyError::LocalFault(_) => ResultCode::OPERATIONS_ERROR,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Policy(_) => "rejected",
            ProxyError::Connect(_) => "connect_error",
            ProxyError::Backend(_) => "backend_error",
            ProxyError::LocalFault(_) => "local_fault",
        }
    }
}

// Convert ProxyError to the result synthesized for the client
impl From<ProxyError> for OperationResult {
    fn from(err: ProxyError) -> Self {
        OperationResult::new(err.result_code(), err.to_string())
    }
}
