//! Feishu Webhook Messaging
//!
//! Builds, secures and delivers messages to a Feishu custom-bot webhook.
//!
//! Key features:
//! - Five message kinds (text, post, image, interactive, share_chat) with
//!   argument validation before anything is sent
//! - Outbound security policy: none, HMAC-SHA256 signature, or keyword gate
//! - Inbound callback verification with a replay window
//! - Blocking HTTP delivery behind a swappable [`Deliver`] seam

pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod security;

pub use delivery::{redact_url, Deliver, HttpDelivery, WebhookResponse, DEFAULT_TIMEOUT};
pub use dispatcher::MessageDispatcher;
pub use error::{FailureClass, NotifyError, NotifyResult};
pub use message::{MessageContent, MessageKind, OutboundMessage, MAX_TEXT_CHARS};
pub use security::{
    sign_inbound, sign_outbound, SecurityManager, SecurityMode, REPLAY_WINDOW_SECONDS,
};
