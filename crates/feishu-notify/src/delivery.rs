//! Webhook delivery.
//!
//! [`Deliver`] is the seam between message preparation and the network so
//! the dispatcher can be exercised against an in-memory double.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use std::time::Duration;
use ureq::ErrorKind;

use crate::error::{NotifyError, NotifyResult};

/// Timeout for one webhook round-trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest webhook response body read back.
const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Decoded webhook reply. `code == 0` means the message was accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(rename = "msg", default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WebhookResponse {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: "success".into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Turn a non-zero reply into [`NotifyError::Remote`].
    pub fn into_result(self) -> NotifyResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(NotifyError::Remote {
                code: self.code,
                message: self.message,
            })
        }
    }
}

/// Posts a serialized message body to the webhook.
pub trait Deliver: Send + Sync {
    fn deliver(&self, body: &[u8]) -> NotifyResult<WebhookResponse>;
}

/// Blocking HTTP delivery to a fixed webhook URL.
pub struct HttpDelivery {
    url: String,
    agent: ureq::Agent,
}

impl std::fmt::Debug for HttpDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDelivery")
            .field("url", &redact_url(&self.url))
            .finish()
    }
}

impl HttpDelivery {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Deliver for HttpDelivery {
    fn deliver(&self, body: &[u8]) -> NotifyResult<WebhookResponse> {
        let response = match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json; charset=utf-8")
            .send_bytes(body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                // The webhook reports business errors in the body even on 4xx/5xx.
                let bytes = read_body(response)?;
                return match serde_json::from_slice::<WebhookResponse>(&bytes) {
                    Ok(decoded) if decoded.code != 0 => Ok(decoded),
                    _ => Err(NotifyError::Remote {
                        code: i64::from(status),
                        message: format!("http status {}", status),
                    }),
                };
            }
            Err(ureq::Error::Transport(transport)) => {
                let summary = summarize_transport(&transport);
                tracing::warn!(webhook = %redact_url(&self.url), error = %summary, "webhook unreachable");
                return Err(NotifyError::Transport(summary));
            }
        };

        let bytes = read_body(response)?;
        serde_json::from_slice(&bytes).map_err(|e| NotifyError::InvalidResponse(e.to_string()))
    }
}

fn read_body(response: ureq::Response) -> NotifyResult<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| NotifyError::Transport(format!("failed to read response body: {}", e)))?;
    Ok(bytes)
}

/// Describe a transport failure without echoing the request URL.
fn summarize_transport(transport: &ureq::Transport) -> String {
    let category = match transport.kind() {
        ErrorKind::ConnectionFailed => "connection refused or target unavailable",
        ErrorKind::Dns => "dns lookup failed",
        ErrorKind::Io => "network i/o error",
        ErrorKind::InvalidUrl => "invalid webhook url",
        ErrorKind::UnknownScheme => "unsupported webhook url scheme",
        ErrorKind::TooManyRedirects => "too many redirects",
        ErrorKind::ProxyConnect => "proxy connect failed",
        ErrorKind::ProxyUnauthorized => "proxy authentication failed",
        ErrorKind::InvalidProxyUrl => "invalid proxy url",
        ErrorKind::BadStatus => "bad status line from server",
        ErrorKind::BadHeader => "bad header from server",
        ErrorKind::InsecureRequestHttpsOnly => "insecure request blocked by https-only setting",
        ErrorKind::HTTP => "http status error",
    };
    match transport.message() {
        Some(detail) if !detail.trim().is_empty() => format!("{}: {}", category, detail.trim()),
        _ => category.to_string(),
    }
}

/// Strip the access token from a webhook URL for logging.
///
/// `https://open.feishu.cn/open-apis/bot/v2/hook/abcdef` becomes
/// `https://open.feishu.cn/open-apis/bot/v2/hook/***`.
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.rfind('/') {
        Some(idx) if idx + 1 < without_query.len() && without_query[..idx].contains("://") => {
            format!("{}/***", &without_query[..idx])
        }
        _ => without_query.to_string(),
    }
}
