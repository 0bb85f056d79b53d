//! Trace level and `$/setTrace` / `$/logTrace` plumbing (§4.G "Tracing").
//!
//! Tracing here is distinct from the `tracing` crate's structured logging:
//! it is a JSON-RPC-level feature where one peer asks the other to report
//! its own message traffic back as `$/logTrace` notifications, at a verbosity
//! the peer controls with `$/setTrace`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SET_TRACE_METHOD: &str = "$/setTrace";
pub const SET_TRACE_NOTIFICATION_METHOD: &str = "$/setTraceNotification";
pub const LOG_TRACE_METHOD: &str = "$/logTrace";
pub const LOG_TRACE_NOTIFICATION_METHOD: &str = "$/logTraceNotification";

/// How much detail the connection reports about its own message traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceLevel {
    #[default]
    Off,
    Messages,
    Verbose,
}

impl TraceLevel {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "messages" => TraceLevel::Messages,
            "verbose" => TraceLevel::Verbose,
            _ => TraceLevel::Off,
        }
    }

    pub fn to_wire(self) -> &'static str {
        match self {
            TraceLevel::Off => "off",
            TraceLevel::Messages => "messages",
            TraceLevel::Verbose => "verbose",
        }
    }
}

/// Receives formatted trace lines, either from this connection's own traffic
/// or forwarded from the peer's `$/logTrace` notifications.
pub trait Tracer: Send + Sync {
    fn log(&self, message: &str, verbose: Option<&str>);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTraceParams {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTraceParams {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<String>,
}

/// Build the one-line summary logged for every traffic event at
/// `Messages` level and above.
pub fn format_summary(direction: &str, kind: &str, method: &str) -> String {
    format!("{direction} {kind} '{method}'")
}

/// Build the verbose body (params/result formatted as JSON) appended at
/// `Verbose` level. Per Open Question (b), `data` is always included when
/// present — the spec notes one source variant omits it inconsistently.
pub fn format_verbose(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trace_level_roundtrips_through_wire_strings() {
        assert_eq!(TraceLevel::from_wire("verbose"), TraceLevel::Verbose);
        assert_eq!(TraceLevel::from_wire("messages"), TraceLevel::Messages);
        assert_eq!(TraceLevel::from_wire("off"), TraceLevel::Off);
        assert_eq!(TraceLevel::from_wire("garbage"), TraceLevel::Off);
        assert_eq!(TraceLevel::Verbose.to_wire(), "verbose");
    }

    #[test]
    fn verbose_formatting_includes_nested_data() {
        let payload = json!({"result": {"data": {"hint": "retry"}}});
        let formatted = format_verbose(&payload);
        assert!(formatted.contains("hint"));
        assert!(formatted.contains("retry"));
    }
}
