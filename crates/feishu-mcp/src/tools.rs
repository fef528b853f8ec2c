//! Tool-call business logic.
//!
//! Every outcome, success or failure, is a [`ToolResult`]. Failures set
//! `isError` and name their class in both the text and the structured
//! content; they never become JSON-RPC error objects.

use serde_json::{json, Map, Value};

use feishu_notify::{FailureClass, MessageDispatcher, NotifyError, WebhookResponse};

use crate::catalog::ToolName;
use crate::types::ToolResult;
use crate::wire::parse_arguments;

/// Run one tool call against a dispatcher snapshot.
pub fn call_tool(dispatcher: &MessageDispatcher, name: &str, arguments: Map<String, Value>) -> ToolResult {
    let Some(tool) = ToolName::from_name(name) else {
        tracing::warn!(tool = name, "unknown tool requested");
        return ToolResult::error_text(format!("unknown tool: {}", name)).with_structured(json!({
            "class": FailureClass::Validation.as_str(),
            "message": format!("unknown tool: {}", name),
        }));
    };

    let outcome = parse_arguments(tool, arguments).and_then(|content| dispatcher.send(content));
    match outcome {
        Ok(response) => success(tool, &response),
        Err(err) => {
            tracing::info!(tool = %tool, class = %err.class(), error = %err, "tool call failed");
            failure(&err)
        }
    }
}

fn success(tool: ToolName, response: &WebhookResponse) -> ToolResult {
    tracing::info!(tool = %tool, code = response.code, "tool call succeeded");
    ToolResult::text(format!(
        "message sent: code={}, msg={}",
        response.code, response.message
    ))
    .with_structured(json!({
        "code": response.code,
        "msg": response.message,
    }))
}

/// Render a send failure as a business-level error result.
pub fn failure(err: &NotifyError) -> ToolResult {
    let text = match (err.class(), err) {
        (_, NotifyError::Remote { code, message }) => {
            format!("remote error (code={}): {}", code, message)
        }
        (FailureClass::Validation, NotifyError::InvalidArgument(detail)) => {
            format!("invalid arguments: {}", detail)
        }
        (FailureClass::Validation, other) => format!("invalid arguments: {}", other),
        (FailureClass::Policy, other) => format!("security policy rejected message: {}", other),
        (FailureClass::Transport, NotifyError::Transport(detail)) => {
            format!("transport error: {}", detail)
        }
        (FailureClass::Remote, other) => format!("remote error: {}", other),
        (_, other) => other.to_string(),
    };

    let mut structured = Map::new();
    structured.insert("class".into(), json!(err.class().as_str()));
    if let Some(code) = err.remote_code() {
        structured.insert("code".into(), json!(code));
    }
    structured.insert("message".into(), json!(err.to_string()));

    ToolResult::error_text(text).with_structured(Value::Object(structured))
}
