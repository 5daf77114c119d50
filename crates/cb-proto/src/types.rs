//! Request and response types for the peer wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A command sent to the peer process.
///
/// Serialized as `{"type": "<command_type>", "params": {...}}` and written
/// to the socket in a single send.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Command {
    /// Create a command with the given type and parameters.
    pub fn new<S: Into<String>>(command_type: S, params: Map<String, Value>) -> Self {
        Self {
            command_type: command_type.into(),
            params,
        }
    }

    /// The liveness probe command.
    pub fn ping() -> Self {
        Self {
            command_type: "ping".to_string(),
            params: Map::new(),
        }
    }

    /// Encode the command as the bytes of one wire frame.
    pub fn to_frame(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A response from the peer process.
///
/// The peer replies `{"status": "success", "result": {...}}` or
/// `{"status": "error", "message": "<text>"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PeerResponse {
    Success {
        #[serde(default)]
        result: Map<String, Value>,
    },
    Error { message: String },
}

impl PeerResponse {
    /// Build a success response carrying the given result map.
    pub fn success(result: Map<String, Value>) -> Self {
        Self::Success { result }
    }

    /// Build a peer-reported error response.
    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Build the degraded response used when an oversized payload could not
    /// be framed before the deadline. The payload data itself is lost; the
    /// result records how many bytes arrived and that they were truncated.
    pub fn truncated(bytes_received: usize) -> Self {
        let mut result = Map::new();
        result.insert("truncated".to_string(), Value::Bool(true));
        result.insert(
            "bytes_received".to_string(),
            Value::Number(bytes_received.into()),
        );
        result.insert(
            "message".to_string(),
            Value::String(format!(
                "response payload of {} bytes did not frame before the deadline; data truncated",
                bytes_received
            )),
        );
        Self::Success { result }
    }

    /// Decode a parsed JSON value into a response.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// True if this is the expected reply to a `ping` probe.
    pub fn is_pong(&self) -> bool {
        match self {
            Self::Success { result } => result.get("pong") == Some(&Value::Bool(true)),
            Self::Error { .. } => false,
        }
    }

    /// Split into the command result or the peer-reported error message.
    pub fn into_result(self) -> Result<Map<String, Value>, String> {
        match self {
            Self::Success { result } => Ok(result),
            Self::Error { message } => Err(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_frame_shape() {
        let mut params = Map::new();
        params.insert("name".to_string(), json!("Cube"));
        let cmd = Command::new("get_object_info", params);

        let frame = cmd.to_frame().unwrap();
        let value: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "get_object_info", "params": {"name": "Cube"}})
        );
    }

    #[test]
    fn ping_command_has_empty_params() {
        let frame = Command::ping().to_frame().unwrap();
        let value: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value, json!({"type": "ping", "params": {}}));
    }

    #[test]
    fn response_decodes_success_and_error() {
        let ok = PeerResponse::from_value(json!({
            "status": "success",
            "result": {"pong": true}
        }))
        .unwrap();
        assert!(ok.is_pong());
        assert_eq!(ok.into_result().unwrap()["pong"], json!(true));

        let err = PeerResponse::from_value(json!({
            "status": "error",
            "message": "no such object"
        }))
        .unwrap();
        assert_eq!(err.into_result().unwrap_err(), "no such object");
    }

    #[test]
    fn success_without_result_defaults_to_empty_map() {
        let ok = PeerResponse::from_value(json!({"status": "success"})).unwrap();
        assert!(ok.into_result().unwrap().is_empty());
    }

    #[test]
    fn truncated_response_is_degraded_success() {
        let resp = PeerResponse::truncated(1_048_576);
        let result = resp.into_result().unwrap();
        assert_eq!(result["truncated"], json!(true));
        assert_eq!(result["bytes_received"], json!(1_048_576));
    }
}
