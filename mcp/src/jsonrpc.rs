//! JSON-RPC 2.0 envelopes.
//!
//! Outbound traffic is always a [`JsonRpcRequest`] (with an `id`) or a notification (a
//! request without one). Inbound traffic is first decoded as a loose [`JsonRpcMessage`]
//! because the same `message` event channel carries responses, server notifications and
//! server-initiated requests such as `ping`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request or notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// `None` turns the request into a notification; no response is expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request that expects a correlated response.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a fire-and-forget notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Structured error object of a failed call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response correlated to one of our requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Any inbound envelope, before it is classified.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Decode a JSON text into a message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Server-to-client request or notification (anything carrying a `method`).
    pub fn is_server_message(&self) -> bool {
        self.method.is_some()
    }

    /// Numeric correlation id, if present. String ids never match our requests.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Turn the message into a correlated response when it is one.
    pub fn into_response(self) -> Option<JsonRpcResponse> {
        if self.is_server_message() {
            return None;
        }
        let id = self.numeric_id()?;
        Some(JsonRpcResponse {
            jsonrpc: self.jsonrpc,
            id,
            result: self.result,
            error: self.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_omits_id() {
        let note = JsonRpcRequest::notification("notifications/initialized", None);
        let encoded = serde_json::to_value(&note).unwrap();
        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"})
        );
        assert!(note.is_notification());
    }

    #[test]
    fn test_request_serializes_params() {
        let req = JsonRpcRequest::new(7, "tools/call", Some(json!({"name": "echo"})));
        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(encoded["id"], 7);
        assert_eq!(encoded["params"]["name"], "echo");
    }

    #[test]
    fn test_message_classification() {
        let response = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#)
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(response.id, 3);
        assert_eq!(response.result, Some(json!({"ok": true})));

        let ping = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#).unwrap();
        assert!(ping.is_server_message());
        assert!(ping.into_response().is_none());

        let string_id = JsonRpcMessage::parse(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#)
            .unwrap();
        assert!(string_id.into_response().is_none());
    }

    #[test]
    fn test_error_response_parses() {
        let response = JsonRpcMessage::parse(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad params"}}"#,
        )
        .unwrap()
        .into_response()
        .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert_eq!(error.message, "bad params");
        assert!(response.result.is_none());
    }
}
