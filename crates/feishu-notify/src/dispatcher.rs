use serde_json::Value;
use std::sync::Arc;

use crate::delivery::{Deliver, WebhookResponse};
use crate::error::NotifyResult;
use crate::message::{MessageContent, OutboundMessage};
use crate::security::SecurityManager;

/// Sends messages to one webhook under one security policy.
///
/// Every send validates, applies the policy, serializes and delivers, in
/// that order. Nothing reaches the network if an earlier step fails.
pub struct MessageDispatcher {
    security: SecurityManager,
    delivery: Arc<dyn Deliver>,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl MessageDispatcher {
    /// Build a dispatcher. Fails if the security configuration is unusable.
    pub fn new(security: SecurityManager, delivery: Arc<dyn Deliver>) -> NotifyResult<Self> {
        security.validate()?;
        Ok(Self { security, delivery })
    }

    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    /// Send already validated content.
    pub fn send(&self, content: MessageContent) -> NotifyResult<WebhookResponse> {
        let mut message = OutboundMessage::new(content);
        self.security.apply(&mut message)?;
        let body = message.to_body()?;

        let kind = message.kind();
        tracing::debug!(msg_type = %kind, bytes = body.len(), "delivering webhook message");
        let response = self.delivery.deliver(&body)?.into_result().map_err(|e| {
            tracing::warn!(msg_type = %kind, error = %e, "webhook rejected message");
            e
        })?;
        tracing::info!(msg_type = %kind, "webhook message sent");
        Ok(response)
    }

    pub fn send_text(&self, text: &str) -> NotifyResult<WebhookResponse> {
        self.send(MessageContent::text(text)?)
    }

    pub fn send_post(&self, title: Option<String>, content: Value) -> NotifyResult<WebhookResponse> {
        self.send(MessageContent::post(title, content)?)
    }

    pub fn send_image(&self, image_key: &str) -> NotifyResult<WebhookResponse> {
        self.send(MessageContent::image(image_key)?)
    }

    pub fn send_interactive(
        &self,
        elements: Vec<Value>,
        config: Option<Value>,
        header: Option<Value>,
    ) -> NotifyResult<WebhookResponse> {
        self.send(MessageContent::interactive(elements, config, header)?)
    }

    pub fn send_share_chat(&self, share_chat_id: &str) -> NotifyResult<WebhookResponse> {
        self.send(MessageContent::share_chat(share_chat_id)?)
    }
}
