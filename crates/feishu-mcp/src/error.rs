//! MCP error types.
//!
//! Protocol-level failures only. Tool-level failures (bad arguments,
//! policy rejections, remote errors) are reported as `isError` tool
//! results and never reach this enum.

use thiserror::Error;

/// Stable JSON-RPC error codes.
pub mod codes {
    /// Malformed JSON. Not emitted: unparseable text carries no id to answer.
    pub const PARSE_ERROR: i64 = -32700;
    /// An object carrying an id that is not a valid request.
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Result type alias for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params")]
    InvalidParams(String),

    #[error("internal error")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl McpError {
    /// Returns the JSON-RPC error code for this error variant.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            McpError::InvalidRequest(_) => codes::INVALID_REQUEST,
            McpError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => codes::INVALID_PARAMS,
            McpError::Serialization(_) => codes::PARSE_ERROR,
            McpError::Config(_) | McpError::Internal(_) | McpError::Transport(_) => {
                codes::INTERNAL_ERROR
            }
        }
    }

    /// Detail carried in the error object's `data` member, if any.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            McpError::InvalidRequest(detail)
            | McpError::InvalidParams(detail)
            | McpError::Internal(detail) => {
                Some(serde_json::Value::String(detail.clone()))
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_error_codes() {
        assert_eq!(McpError::InvalidRequest("x".into()).json_rpc_code(), -32600);
        assert_eq!(McpError::MethodNotFound("x".into()).json_rpc_code(), -32601);
        assert_eq!(McpError::InvalidParams("x".into()).json_rpc_code(), -32602);
        assert_eq!(McpError::Internal("x".into()).json_rpc_code(), -32603);
        assert_eq!(McpError::Transport("x".into()).json_rpc_code(), -32603);
        assert_eq!(McpError::Config("x".into()).json_rpc_code(), -32603);
        assert_eq!(McpError::Serialization("x".into()).json_rpc_code(), -32700);
    }

    #[test]
    fn test_detail_goes_to_data() {
        let err = McpError::InvalidParams("missing field `name`".into());
        assert_eq!(err.to_string(), "invalid params");
        assert_eq!(err.data(), Some(serde_json::json!("missing field `name`")));
        assert_eq!(McpError::MethodNotFound("foo".into()).data(), None);
    }

    #[test]
    fn test_method_name_in_message() {
        let err = McpError::MethodNotFound("resources/list".into());
        assert!(err.to_string().contains("resources/list"));
    }
}
