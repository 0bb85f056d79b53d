//! Core JSON-RPC 2.0 message types (§3 Data Model).
//!
//! `RequestId`, `JsonRpcRequest`/`JsonRpcResponse`/`JsonRpcNotification`, and
//! the `Message` sum type that wraps them for dispatch. `$/progress` is
//! represented as an ordinary `JsonRpcNotification` per §3 — the spec is
//! explicit that Progress is "a notification with method `$/progress`", not
//! a distinct wire shape.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResponseError;

/// Request identifier: string or number, per JSON-RPC 2.0. Requests never
/// carry a null id; responses may (see [`Message::Response`]'s `id` field).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    pub fn new_string(id: impl Into<String>) -> Self {
        RequestId::String(id.into())
    }

    pub fn new_number(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// A JSON-RPC 2.0 request: expects a matching response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 response: exactly one of `result`/`error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    /// `None` serializes as JSON `null` — reserved for parse errors with no
    /// recoverable id, per §3.
    #[serde(default)]
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    pub fn success(result: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    pub fn failure(error: ResponseError, id: Option<RequestId>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// A JSON-RPC 2.0 notification: no `id`, no reply expected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// The three message shapes that can appear framed on the wire.
///
/// `Message` does not derive `Serialize`/`Deserialize` directly: JSON-RPC
/// disambiguates variants structurally (presence of `id`, `method`,
/// `result`/`error`), which `#[serde(untagged)]` handles unreliably once two
/// variants share optional fields. [`Message::from_value`] and
/// [`Message::to_value`] do the classification explicitly instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl Message {
    pub fn request(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Message::Request(JsonRpcRequest::new(method, params, id))
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(JsonRpcNotification::new(method, params))
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }

    /// Classify a raw JSON value into a `Message` variant.
    ///
    /// Disambiguation rule: a `method` field with no `result`/`error` key is
    /// a request (if it has `id`) or notification (if it doesn't); anything
    /// else with neither `method` nor `id`-plus-method is treated as a
    /// response (the catch-all, so malformed shapes surface as response
    /// parse failures rather than silently matching the wrong arm).
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some();

        if has_method && has_id {
            Ok(Message::Request(serde_json::from_value(value)?))
        } else if has_method {
            Ok(Message::Notification(serde_json::from_value(value)?))
        } else {
            Ok(Message::Response(serde_json::from_value(value)?))
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Message::Request(r) => serde_json::to_value(r),
            Message::Response(r) => serde_json::to_value(r),
            Message::Notification(n) => serde_json::to_value(n),
        }
    }

    /// Whether this is neither a well-formed request, response, nor
    /// notification shape — used to detect the "Invalid message" case of
    /// §4.G (a message with `method` missing and no `result`/`error`/`id`
    /// deserializes to `Message::Response` above but fails struct
    /// deserialization here, surfacing as an error rather than a silent
    /// false classification).
    pub fn is_well_formed(value: &Value) -> bool {
        value.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip() {
        let req = JsonRpcRequest::new("subtract", Some(json!([42, 23])), RequestId::new_number(1));
        let value = serde_json::to_value(&req).unwrap();
        let msg = Message::from_value(value).unwrap();
        assert_eq!(msg, Message::Request(req));
    }

    #[test]
    fn notification_has_no_id_field() {
        let note = JsonRpcNotification::new("heartbeat", None);
        let value = serde_json::to_value(&note).unwrap();
        assert!(value.get("id").is_none());
        let msg = Message::from_value(value).unwrap();
        assert_eq!(msg, Message::Notification(note));
    }

    #[test]
    fn response_with_null_id_round_trips() {
        let resp = JsonRpcResponse::failure(ResponseError::parse_error("bad json"), None);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value.get("id"), Some(&Value::Null));
        let msg = Message::from_value(value).unwrap();
        assert_eq!(msg, Message::Response(resp));
    }

    #[test]
    fn request_id_zero_round_trips_distinct_from_missing() {
        let req = JsonRpcRequest::new("ping", None, RequestId::new_number(0));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value.get("id"), Some(&json!(0)));
    }
}
