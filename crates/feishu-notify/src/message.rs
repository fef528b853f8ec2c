//! Outbound webhook messages.
//!
//! A message is a closed set of kinds, each carrying its own validated
//! fields. The wire body is `{"msg_type": ..., "content": ..., "timestamp"?,
//! "sign"?}`; the last two only appear once the security manager has
//! stamped a signature.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{NotifyError, NotifyResult};

/// Longest text body accepted for a text message, in characters.
pub const MAX_TEXT_CHARS: usize = 30_000;

/// Locale key the rich-text tree is wrapped under.
const POST_LOCALE: &str = "zh_cn";

/// The `msg_type` tag of a webhook message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Post,
    Image,
    Interactive,
    ShareChat,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Post => "post",
            MessageKind::Image => "image",
            MessageKind::Interactive => "interactive",
            MessageKind::ShareChat => "share_chat",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific message content.
///
/// Serializes to exactly the `content` object the webhook expects for the
/// kind; the tag lives on [`OutboundMessage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text {
        text: String,
    },
    Post {
        post: Value,
    },
    Image {
        image_key: String,
    },
    Interactive {
        #[serde(skip_serializing_if = "Option::is_none")]
        config: Option<Value>,
        elements: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        header: Option<Value>,
    },
    ShareChat {
        share_chat_id: String,
    },
}

impl MessageContent {
    /// Plain text message. Must be non-blank and within [`MAX_TEXT_CHARS`].
    pub fn text(text: impl Into<String>) -> NotifyResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(NotifyError::InvalidArgument("text must not be empty".into()));
        }
        let chars = text.chars().count();
        if chars > MAX_TEXT_CHARS {
            return Err(NotifyError::InvalidArgument(format!(
                "text is {} characters, limit is {}",
                chars, MAX_TEXT_CHARS
            )));
        }
        Ok(MessageContent::Text { text })
    }

    /// Rich-text message from a content tree (array of lines, each an
    /// array of elements) and an optional title.
    pub fn post(title: Option<String>, content: Value) -> NotifyResult<Self> {
        if !content.is_array() {
            return Err(NotifyError::InvalidArgument(
                "post content must be an array of lines".into(),
            ));
        }
        let mut body = Map::new();
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            body.insert("title".into(), Value::String(title));
        }
        body.insert("content".into(), content);

        let mut post = Map::new();
        post.insert(POST_LOCALE.into(), Value::Object(body));
        Ok(MessageContent::Post {
            post: Value::Object(post),
        })
    }

    /// Image message referencing an already uploaded image.
    pub fn image(image_key: impl Into<String>) -> NotifyResult<Self> {
        let image_key = image_key.into();
        if image_key.trim().is_empty() {
            return Err(NotifyError::InvalidArgument(
                "image_key must not be empty".into(),
            ));
        }
        Ok(MessageContent::Image { image_key })
    }

    /// Interactive card. `elements` must be non-empty; `config` and
    /// `header` must be objects when given.
    pub fn interactive(
        elements: Vec<Value>,
        config: Option<Value>,
        header: Option<Value>,
    ) -> NotifyResult<Self> {
        if elements.is_empty() {
            return Err(NotifyError::InvalidArgument(
                "elements must not be empty".into(),
            ));
        }
        let config = non_null(config);
        let header = non_null(header);
        if config.as_ref().is_some_and(|c| !c.is_object()) {
            return Err(NotifyError::InvalidArgument("config must be an object".into()));
        }
        if header.as_ref().is_some_and(|h| !h.is_object()) {
            return Err(NotifyError::InvalidArgument("header must be an object".into()));
        }
        Ok(MessageContent::Interactive {
            config,
            elements,
            header,
        })
    }

    /// Share-chat card for the given chat.
    pub fn share_chat(share_chat_id: impl Into<String>) -> NotifyResult<Self> {
        let share_chat_id = share_chat_id.into();
        if share_chat_id.trim().is_empty() {
            return Err(NotifyError::InvalidArgument(
                "share_chat_id must not be empty".into(),
            ));
        }
        Ok(MessageContent::ShareChat { share_chat_id })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessageContent::Text { .. } => MessageKind::Text,
            MessageContent::Post { .. } => MessageKind::Post,
            MessageContent::Image { .. } => MessageKind::Image,
            MessageContent::Interactive { .. } => MessageKind::Interactive,
            MessageContent::ShareChat { .. } => MessageKind::ShareChat,
        }
    }

    /// The text a keyword gate should look at, if the kind carries any.
    ///
    /// Image and share-chat messages have no text and yield `None`.
    pub fn representative_text(&self) -> Option<String> {
        match self {
            MessageContent::Text { text } => non_empty(text.clone()),
            MessageContent::Post { post } => text_in(post),
            MessageContent::Interactive {
                elements, header, ..
            } => header
                .as_ref()
                .and_then(text_in)
                .or_else(|| elements.iter().find_map(text_in)),
            MessageContent::Image { .. } | MessageContent::ShareChat { .. } => None,
        }
    }
}

/// Keys whose values are text-bearing, tried in this order.
const TEXT_KEYS: [&str; 3] = ["text", "title", "content"];

/// Walk a structured value for the first non-empty text.
///
/// Strings count when reached through a text-bearing key or as array
/// elements; other keys are only descended into when they hold nested
/// structure, so tags like `"tag": "div"` are never mistaken for text.
fn text_in(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s.clone()),
        Value::Array(items) => items.iter().find_map(text_in),
        Value::Object(map) => TEXT_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(text_in)
            .or_else(|| {
                map.iter()
                    .filter(|(key, v)| {
                        !TEXT_KEYS.contains(&key.as_str()) && (v.is_object() || v.is_array())
                    })
                    .find_map(|(_, v)| text_in(v))
            }),
        _ => None,
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

/// A webhook request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    msg_type: MessageKind,
    content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sign: Option<String>,
}

impl OutboundMessage {
    /// Wrap validated content; the `msg_type` tag follows the content kind.
    pub fn new(content: MessageContent) -> Self {
        Self {
            msg_type: content.kind(),
            content,
            timestamp: None,
            sign: None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.msg_type
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn sign(&self) -> Option<&str> {
        self.sign.as_deref()
    }

    /// Attach a signature. Only the security manager does this.
    pub(crate) fn stamp(&mut self, timestamp: i64, sign: String) {
        self.timestamp = Some(timestamp);
        self.sign = Some(sign);
    }

    /// Serialize to the JSON body sent to the webhook.
    pub fn to_body(&self) -> NotifyResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl From<MessageContent> for OutboundMessage {
    fn from(content: MessageContent) -> Self {
        OutboundMessage::new(content)
    }
}
