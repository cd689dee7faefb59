// src/protocol/response.rs
use super::control::Control;
use super::request::{Attribute, Request};
use std::fmt;

/// Result code of a terminal response. Codes returned by a backend are
/// relayed as-is, so any value is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const COMPARE_FALSE: ResultCode = ResultCode(5);
    pub const COMPARE_TRUE: ResultCode = ResultCode(6);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const INSUFFICIENT_ACCESS_RIGHTS: ResultCode = ResultCode(50);
    pub const BUSY: ResultCode = ResultCode(51);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);
    pub const OTHER: ResultCode = ResultCode(80);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    pub fn name(&self) -> &'static str {
        match self.0 {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            5 => "compareFalse",
            6 => "compareTrue",
            32 => "noSuchObject",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            80 => "other",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// The terminal result of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub message: String,
    pub referrals: Vec<String>,
    /// Extended response name, only set on extended operation results.
    pub response_name: Option<String>,
    /// Extended response value or server SASL credentials.
    pub response_value: Option<Vec<u8>>,
    pub controls: Vec<Control>,
}

impl OperationResult {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            message: message.into(),
            referrals: Vec::new(),
            response_name: None,
            response_value: None,
            controls: Vec::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::SUCCESS, "")
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateResponse {
    pub oid: Option<String>,
    pub value: Option<Vec<u8>>,
}

/// A non-terminal response relayed to the client ahead of the final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intermediate {
    Entry(SearchEntry),
    Reference(Vec<String>),
    Response(IntermediateResponse),
}

/// A decoded request as handed over by the inbound codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub message_id: i32,
    pub request: Request,
}

impl ClientRequest {
    pub fn new(message_id: i32, request: impl Into<Request>) -> Self {
        Self {
            message_id,
            request: request.into(),
        }
    }
}

/// A response to be encoded back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientResponse {
    Intermediate {
        message_id: i32,
        item: Intermediate,
    },
    Done {
        message_id: i32,
        result: OperationResult,
    },
}

impl ClientResponse {
    pub fn message_id(&self) -> i32 {
        match self {
            ClientResponse::Intermediate { message_id, .. } => *message_id,
            ClientResponse::Done { message_id, .. } => *message_id,
        }
    }
}
