//! mcp-feishu Root Library
//!
//! Wires configuration to the message dispatcher and the MCP server. The
//! binary in `main.rs` is a thin CLI over these functions.

pub mod config;
pub mod error;

pub use config::{AppConfig, FeishuConfig, LoadOptions, McpConfig};
pub use error::{RootError, RootResult};

use std::sync::Arc;
use tracing::info;

use feishu_mcp::McpServer;
use feishu_notify::{redact_url, Deliver, HttpDelivery, MessageDispatcher, SecurityMode};

/// Build a dispatcher over an arbitrary delivery.
pub fn build_dispatcher_with(
    feishu: &FeishuConfig,
    delivery: Arc<dyn Deliver>,
) -> RootResult<MessageDispatcher> {
    let security = feishu.security_manager()?;
    Ok(MessageDispatcher::new(security, delivery)?)
}

/// Validate `config` and build the MCP server over HTTP delivery.
pub fn initialize_server(config: &AppConfig) -> RootResult<McpServer> {
    let delivery = Arc::new(HttpDelivery::new(config.feishu.webhook_url.clone()));
    initialize_server_with(config, delivery)
}

/// Validate `config` and build the MCP server over `delivery`.
pub fn initialize_server_with(config: &AppConfig, delivery: Arc<dyn Deliver>) -> RootResult<McpServer> {
    config.validate()?;
    let dispatcher = build_dispatcher_with(&config.feishu, delivery)?;
    let span = tracing::info_span!("mcp_server", component = "mcp-server");
    let server = McpServer::new(config.mcp.to_server_config(), dispatcher)?.with_span(span);

    info!(
        webhook = %redact_url(&config.feishu.webhook_url),
        security_type = %config.feishu.security_type,
        server = %config.mcp.server_name,
        "mcp server initialized"
    );
    Ok(server)
}

/// Validate `config` and swap the server's dispatcher for one posting to
/// the new webhook under the new policy.
///
/// Invalid settings leave the running dispatcher untouched.
pub fn reconfigure(server: &McpServer, config: &AppConfig) -> RootResult<()> {
    config.validate()?;
    let delivery = Arc::new(HttpDelivery::new(config.feishu.webhook_url.clone()));
    reconfigure_with(server, &config.feishu, delivery)
}

pub fn reconfigure_with(
    server: &McpServer,
    feishu: &FeishuConfig,
    delivery: Arc<dyn Deliver>,
) -> RootResult<()> {
    let dispatcher = build_dispatcher_with(feishu, delivery)?;
    server.update_dispatcher(dispatcher);
    info!(webhook = %redact_url(&feishu.webhook_url), "feishu client reconfigured");
    Ok(())
}

/// Outcome of checking a signed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackVerdict {
    Verified,
    /// Signature mode is not configured, so there is nothing to check.
    NotApplicable,
}

/// Verify an inbound signed callback against the configured secret.
pub fn verify_callback(
    feishu: &FeishuConfig,
    timestamp: &str,
    signature: &str,
    body: &[u8],
) -> RootResult<CallbackVerdict> {
    let security = feishu.security_manager()?;
    if security.mode() != SecurityMode::Signature {
        return Ok(CallbackVerdict::NotApplicable);
    }
    security.verify_inbound(timestamp, signature, body)?;
    Ok(CallbackVerdict::Verified)
}
