//! Feishu MCP Protocol Engine
//!
//! A JSON-RPC 2.0 server speaking the Model Context Protocol over a pair of
//! byte streams (stdin/stdout in production). It exposes five tools that
//! send messages through a [`feishu_notify::MessageDispatcher`].
//!
//! Key features:
//! - One request at a time, responses in request order, each flushed
//! - Notifications (no id) are handled but never answered
//! - Tool failures are `isError` results; protocol failures are error objects
//! - The active dispatcher can be swapped while the loop runs

pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod server;
pub mod tools;
pub mod types;
pub mod wire;

pub use catalog::{list_tools, ToolName};
pub use dispatcher::{decode_request, dispatch_jsonrpc, parse_jsonrpc_request};
pub use error::{codes, McpError, McpResult};
pub use server::{McpServer, ServeSummary, ShutdownHandle};
pub use tools::call_tool;
pub use types::{
    ContentItem, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpServerConfig, Outcome,
    ToolCallParams, ToolDescriptor, ToolResult, DEFAULT_INSTRUCTIONS, PROTOCOL_VERSION,
};
