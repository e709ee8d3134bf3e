//! Error type shared by every MCP client operation.

use crate::jsonrpc::JsonRpcError;
use std::error::Error;
use std::fmt;

/// Failure raised while talking to an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub enum McpError {
    /// No message endpoint is known; the client was never connected or has been torn down.
    NotConnected,
    /// The connection went away while the request was still pending.
    Disconnected,
    /// A bounded wait elapsed (endpoint event or request round trip).
    Timeout(String),
    /// Network level failure: refused connection, broken stream, I/O error.
    Transport(String),
    /// The server answered with a non-2xx status.
    HttpStatus(u16),
    /// The server sent something that is not valid JSON-RPC / MCP.
    Protocol(String),
    /// The server answered with a JSON-RPC error object.
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    /// The configured server URL (or a received endpoint) cannot be parsed.
    InvalidUrl(String),
}

impl McpError {
    /// Whether the error belongs to the transport family (timeouts included).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McpError::NotConnected
                | McpError::Disconnected
                | McpError::Timeout(_)
                | McpError::Transport(_)
                | McpError::HttpStatus(_)
        )
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::NotConnected => write!(f, "MCP client is not connected"),
            McpError::Disconnected => write!(f, "MCP client disconnected"),
            McpError::Timeout(what) => write!(f, "Timed out: {}", what),
            McpError::Transport(msg) => write!(f, "Transport error: {}", msg),
            McpError::HttpStatus(status) => write!(f, "MCP server returned HTTP status {}", status),
            McpError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            McpError::Rpc { code, message, .. } => {
                write!(f, "MCP server error {}: {}", code, message)
            }
            McpError::InvalidUrl(url) => write!(f, "Invalid URL: {}", url),
        }
    }
}

impl Error for McpError {}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            McpError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            McpError::HttpStatus(status.as_u16())
        } else {
            McpError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(err.to_string())
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_conversion_keeps_code_and_message() {
        let err: McpError = JsonRpcError {
            code: -32601,
            message: "Method not found".to_string(),
            data: None,
        }
        .into();

        assert_eq!(err.to_string(), "MCP server error -32601: Method not found");
        assert!(!err.is_transport());
    }

    #[test]
    fn test_transport_family() {
        assert!(McpError::Disconnected.is_transport());
        assert!(McpError::Timeout("endpoint".into()).is_transport());
        assert!(McpError::HttpStatus(502).is_transport());
        assert!(!McpError::Protocol("bad".into()).is_transport());
    }
}
