//! Error taxonomy for the connection core.
//!
//! Mirrors the reserved JSON-RPC 2.0 error codes plus the local lifecycle,
//! transport and cancellation error families described in the spec's
//! error-handling design. Each family is its own `thiserror` enum so callers
//! can match on the failure domain without string inspection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::RequestId;

/// JSON-RPC 2.0 reserved error codes, plus the local codes this crate adds
/// for transport-level read/write failures.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    pub const UNKNOWN_ERROR_CODE: i32 = -32001;
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const CONTENT_MODIFIED: i32 = -32801;
    pub const SERVER_CANCELLED: i32 = -32802;
    pub const REQUEST_FAILED: i32 = -32803;

    /// Local range, outside the reserved `[-32768, -32000]` JSON-RPC band.
    pub const MESSAGE_WRITE_ERROR: i32 = -32099;
    pub const MESSAGE_READ_ERROR: i32 = -32098;

    /// Lower bound (inclusive) of the range JSON-RPC reserves for itself.
    pub const RESERVED_RANGE_START: i32 = -32768;
    /// Upper bound (inclusive) of the range JSON-RPC reserves for itself.
    pub const RESERVED_RANGE_END: i32 = -32000;
}

/// A JSON-RPC 2.0 error object: `{ code, message, data? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether `code` falls in the range JSON-RPC reserves for itself.
    ///
    /// Codes outside this range are available for application use, per §3.
    pub fn is_reserved_code(code: i32) -> bool {
        (error_codes::RESERVED_RANGE_START..=error_codes::RESERVED_RANGE_END).contains(&code)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }

    pub fn request_cancelled() -> Self {
        Self::new(error_codes::REQUEST_CANCELLED, "Request cancelled")
    }

    pub fn message_write_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::MESSAGE_WRITE_ERROR, message)
    }

    pub fn message_read_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::MESSAGE_READ_ERROR, message)
    }

    /// Wrap a handler failure that carried a plain message string, per the
    /// inbound-request rejection rule in §4.G.
    pub fn from_handler_message(method: &str, message: &str) -> Self {
        Self::internal_error(format!("Request {method} failed with message: {message}"))
    }

    pub fn from_handler_unknown(method: &str) -> Self {
        Self::internal_error(format!("Request {method} failed"))
    }

    /// A response carried neither `result` nor `error` (§4.G inbound response).
    pub fn neither_result_nor_error() -> Self {
        Self::internal_error("Response contained neither result nor error")
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Connection-level lifecycle and dispatch errors (§7 items 1, 3, 5).
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// `sendRequest` called before `listen()`.
    #[error("connection is not listening")]
    NotListening,

    /// A second call to `listen()`.
    #[error("connection is already listening")]
    AlreadyListening,

    /// Operation attempted on a closed connection.
    #[error("connection is closed")]
    Closed,

    /// Operation attempted on a disposed connection.
    #[error("connection has been disposed")]
    Disposed,

    /// A request handler raised a structured JSON-RPC error, a write failed
    /// (`MessageWriteError`), or a read failed while responses were pending
    /// (`MessageReadError`).
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The correlation table has no pending entry for this id.
    #[error("no pending request for id {0}")]
    UnknownRequestId(RequestId),
}

/// Errors from the framed transport layer (§4.A–C, §7 items 1 and 4).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header line (missing ':'): {0:?}")]
    MalformedHeader(String),

    #[error("non-numeric Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("missing mandatory Content-Length header")]
    MissingContentLength,

    #[error("unknown content-type codec: {0}")]
    UnknownContentType(String),

    #[error("unknown content-encoding codec: {0}")]
    UnknownContentEncoding(String),

    #[error("JSON encode/decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("content-encoding codec failure: {0}")]
    Codec(String),

    #[error("transport is closed")]
    Closed,
}
