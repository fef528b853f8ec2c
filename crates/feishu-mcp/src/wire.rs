//! Wire types for tool arguments, with `TryFrom` conversions into message
//! content. Validation happens on conversion, before anything is sent.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use feishu_notify::{MessageContent, NotifyError, NotifyResult};

use crate::catalog::ToolName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTextArgs {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePostArgs {
    #[serde(default)]
    pub title: Option<String>,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireImageArgs {
    pub image_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireInteractiveArgs {
    #[serde(default)]
    pub config: Option<Value>,
    pub elements: Value,
    #[serde(default)]
    pub header: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireShareChatArgs {
    pub share_chat_id: String,
}

// ---------------------------------------------------------------------------
// TryFrom conversions
// ---------------------------------------------------------------------------

impl TryFrom<WireTextArgs> for MessageContent {
    type Error = NotifyError;

    fn try_from(wire: WireTextArgs) -> NotifyResult<Self> {
        MessageContent::text(wire.text)
    }
}

impl TryFrom<WirePostArgs> for MessageContent {
    type Error = NotifyError;

    fn try_from(wire: WirePostArgs) -> NotifyResult<Self> {
        MessageContent::post(wire.title, wire.content)
    }
}

impl TryFrom<WireImageArgs> for MessageContent {
    type Error = NotifyError;

    fn try_from(wire: WireImageArgs) -> NotifyResult<Self> {
        MessageContent::image(wire.image_key)
    }
}

impl TryFrom<WireInteractiveArgs> for MessageContent {
    type Error = NotifyError;

    fn try_from(wire: WireInteractiveArgs) -> NotifyResult<Self> {
        let elements = match wire.elements {
            Value::Array(items) => items,
            _ => {
                return Err(NotifyError::InvalidArgument(
                    "elements must be an array".into(),
                ))
            }
        };
        MessageContent::interactive(elements, wire.config, wire.header)
    }
}

impl TryFrom<WireShareChatArgs> for MessageContent {
    type Error = NotifyError;

    fn try_from(wire: WireShareChatArgs) -> NotifyResult<Self> {
        MessageContent::share_chat(wire.share_chat_id)
    }
}

fn decode<W>(arguments: Map<String, Value>) -> NotifyResult<MessageContent>
where
    W: DeserializeOwned,
    MessageContent: TryFrom<W, Error = NotifyError>,
{
    let wire: W = serde_json::from_value(Value::Object(arguments))
        .map_err(|e| NotifyError::InvalidArgument(e.to_string()))?;
    MessageContent::try_from(wire)
}

/// Decode and validate the arguments of a tool call.
pub fn parse_arguments(tool: ToolName, arguments: Map<String, Value>) -> NotifyResult<MessageContent> {
    match tool {
        ToolName::SendText => decode::<WireTextArgs>(arguments),
        ToolName::SendPost => decode::<WirePostArgs>(arguments),
        ToolName::SendImage => decode::<WireImageArgs>(arguments),
        ToolName::SendInteractive => decode::<WireInteractiveArgs>(arguments),
        ToolName::SendShareChat => decode::<WireShareChatArgs>(arguments),
    }
}
