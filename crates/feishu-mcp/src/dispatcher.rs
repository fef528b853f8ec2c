//! JSON-RPC 2.0 dispatcher.
//!
//! Routes a decoded request to its handler and wraps the outcome in a
//! response. Requests without an id are still handled but never answered.

use serde_json::{json, Value};

use crate::catalog::list_tools;
use crate::error::{McpError, McpResult};
use crate::server::McpServer;
use crate::tools::call_tool;
use crate::types::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, McpServerConfig, ServerCapabilities,
    ServerInfo, ToolCallParams, ToolsCapability, PROTOCOL_VERSION,
};

/// Decode a JSON value into a request. Anything without a string `method`
/// is rejected as an invalid request.
pub fn decode_request(value: Value) -> McpResult<JsonRpcRequest> {
    let request: JsonRpcRequest =
        serde_json::from_value(value).map_err(|e| McpError::InvalidRequest(e.to_string()))?;
    if request.jsonrpc != "2.0" {
        tracing::debug!(jsonrpc = %request.jsonrpc, "request without jsonrpc 2.0 marker");
    }
    Ok(request)
}

/// Parse a raw JSON string into a request.
pub fn parse_jsonrpc_request(raw: &str) -> McpResult<JsonRpcRequest> {
    decode_request(serde_json::from_str(raw)?)
}

/// Dispatch a decoded request.
///
/// Returns `None` for notifications. Errors are wrapped in error
/// responses; this never fails.
pub fn dispatch_jsonrpc(server: &McpServer, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    let outcome = match request.method.as_str() {
        "initialize" => handle_initialize(server.config()),
        "notifications/initialized" => {
            tracing::info!("client finished initialization");
            return None;
        }
        "ping" => Ok(json!({"status": "pong"})),
        "tools/list" => handle_tools_list(),
        "tools/call" => handle_tools_call(server, request.params.as_ref()),
        other => Err(McpError::MethodNotFound(other.to_string())),
    };

    respond(request, outcome)
}

/// Wrap a handler outcome in a response echoing the request id.
fn respond(request: &JsonRpcRequest, outcome: McpResult<Value>) -> Option<JsonRpcResponse> {
    let id = request.id.clone()?;
    Some(match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(err) => {
            tracing::debug!(method = %request.method, code = err.json_rpc_code(), error = %err, "request failed");
            JsonRpcResponse::error(id, (&err).into())
        }
    })
}

fn handle_initialize(config: &McpServerConfig) -> McpResult<Value> {
    tracing::info!(server = %config.server_name, "initialize");
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.into(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability {
                list_changed: false,
            },
        },
        server_info: ServerInfo {
            name: config.server_name.clone(),
            version: config.server_version.clone(),
        },
        instructions: config.instructions.clone(),
    };
    to_result(&result)
}

fn handle_tools_list() -> McpResult<Value> {
    Ok(json!({ "tools": list_tools() }))
}

fn handle_tools_call(server: &McpServer, params: Option<&Value>) -> McpResult<Value> {
    let params: ToolCallParams = serde_json::from_value(params.cloned().unwrap_or(Value::Null))
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;
    let (name, arguments) = params.into_parts();

    // One snapshot per call so a reconfiguration cannot split a send.
    let dispatcher = server.dispatcher();
    tracing::info!(tool = %name, "tools/call");
    let result = call_tool(&dispatcher, &name, arguments);
    to_result(&result)
}

fn to_result<T: serde::Serialize>(value: &T) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| McpError::Internal(e.to_string()))
}
