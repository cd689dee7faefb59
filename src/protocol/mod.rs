// src/protocol/mod.rs
//! In-memory model of the directory protocol messages the proxy routes.
//!
//! Encoding these to and from the wire is the job of the codec that feeds
//! the [`server`](crate::server) acceptor and implements
//! [`BackendConnection`](crate::proxy::BackendConnection).
mod control;
mod request;
mod response;

pub use control::{Control, PROXIED_AUTHORIZATION_OID};
pub use request::{
    AddRequest, Attribute, Authentication, BindRequest, CompareRequest, DeleteRequest,
    DerefAliases, ExtendedRequest, Modification, ModifyDnRequest, ModifyOperation,
    ModifyRequest, Operation, OperationKind, Request, SearchRequest, SearchScope,
};
pub use response::{
    ClientRequest, ClientResponse, Intermediate, IntermediateResponse, OperationResult,
    ResultCode, SearchEntry,
};

/// Extended operation OID of the cancel operation (RFC 3909).
pub const CANCEL_OID: &str = "1.3.6.1.1.8";

/// Extended operation OID of StartTLS (RFC 4511 section 4.14).
pub const START_TLS_OID: &str = "1.3.6.1.4.1.1466.20037";
