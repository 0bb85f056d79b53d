//! Progress token routing (§4.H).
//!
//! Progress is represented on the wire as an ordinary notification with
//! method `$/progress` and params `{ token, value }` (§3) — there is no
//! distinct wire shape, only a routing convention keyed by `token`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROGRESS_METHOD: &str = "$/progress";

/// Opaque id shared out-of-band in a parent request's params, used to
/// multiplex streaming updates belonging to that request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

impl std::fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressToken::String(s) => write!(f, "{s}"),
            ProgressToken::Number(n) => write!(f, "{n}"),
        }
    }
}

/// The params shape of a `$/progress` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressParams {
    pub token: ProgressToken,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_params_round_trip_with_numeric_token() {
        let params = ProgressParams {
            token: ProgressToken::Number(3),
            value: json!({"kind": "report", "percentage": 50}),
        };
        let value = serde_json::to_value(&params).unwrap();
        let back: ProgressParams = serde_json::from_value(value).unwrap();
        assert_eq!(back.token, ProgressToken::Number(3));
    }

    #[test]
    fn progress_token_accepts_string_form() {
        let value = json!({"token": "upload-1", "value": {"done": true}});
        let params: ProgressParams = serde_json::from_value(value).unwrap();
        assert_eq!(params.token, ProgressToken::String("upload-1".to_string()));
    }
}
