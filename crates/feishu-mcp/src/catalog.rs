//! Static tool catalog.

use serde_json::{json, Value};

use crate::types::ToolDescriptor;

/// The five message-sending tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SendText,
    SendPost,
    SendImage,
    SendInteractive,
    SendShareChat,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::SendText,
        ToolName::SendPost,
        ToolName::SendImage,
        ToolName::SendInteractive,
        ToolName::SendShareChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SendText => "send_text_message",
            ToolName::SendPost => "send_post_message",
            ToolName::SendImage => "send_image_message",
            ToolName::SendInteractive => "send_interactive_message",
            ToolName::SendShareChat => "send_share_chat_message",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            ToolName::SendText => {
                "Send a plain text message. Line breaks are kept. Use for notices and status updates. \
                 The configured security policy is applied automatically.\n\n\
                 Example: {\"text\": \"Maintenance tonight 22:00-24:00\"}"
            }
            ToolName::SendPost => {
                "Send a rich-text post with an optional title. Provide only the content lines; \
                 they are wrapped into the webhook post structure for you.\n\n\
                 Example: {\"title\": \"Report\", \"content\": [[{\"tag\": \"text\", \"text\": \"Sales up 15%\"}]]}"
            }
            ToolName::SendImage => {
                "Send an image that was already uploaded to Feishu, referenced by its image_key.\n\n\
                 Example: {\"image_key\": \"img_v2_041b28e3-xxxx\"}"
            }
            ToolName::SendInteractive => {
                "Send an interactive card with buttons, layout blocks and other card elements.\n\n\
                 Example: {\"elements\": [{\"tag\": \"div\", \"text\": {\"tag\": \"plain_text\", \"content\": \"Please confirm\"}}]}"
            }
            ToolName::SendShareChat => {
                "Share a group chat card so recipients can join the group. The bot must be a member.\n\n\
                 Example: {\"share_chat_id\": \"oc_a0553eda9014c201e6969b478895c230\"}"
            }
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            ToolName::SendText => json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Text to send, at most 30000 characters. Must contain a configured keyword when keyword security is enabled."
                    }
                },
                "required": ["text"]
            }),
            ToolName::SendPost => json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Optional title shown at the top of the post."
                    },
                    "content": {
                        "type": "array",
                        "description": "Lines of the post; each line is an array of elements such as text, a, at or img."
                    }
                },
                "required": ["content"]
            }),
            ToolName::SendImage => json!({
                "type": "object",
                "properties": {
                    "image_key": {
                        "type": "string",
                        "description": "Image resource key, usually starting with img_v2_."
                    }
                },
                "required": ["image_key"]
            }),
            ToolName::SendInteractive => json!({
                "type": "object",
                "properties": {
                    "config": {
                        "type": "object",
                        "description": "Optional card configuration, e.g. {\"wide_screen_mode\": true}."
                    },
                    "elements": {
                        "type": "array",
                        "description": "Card elements; each needs a tag such as div, hr, img, action or field."
                    },
                    "header": {
                        "type": "object",
                        "description": "Optional card header, e.g. {\"title\": {\"tag\": \"plain_text\", \"content\": \"Title\"}, \"template\": \"blue\"}."
                    }
                },
                "required": ["elements"]
            }),
            ToolName::SendShareChat => json!({
                "type": "object",
                "properties": {
                    "share_chat_id": {
                        "type": "string",
                        "description": "Chat id to share, usually starting with oc_."
                    }
                },
                "required": ["share_chat_id"]
            }),
        }
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.as_str().into(),
            description: self.description().into(),
            input_schema: self.input_schema(),
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptors for every tool, in catalog order.
pub fn list_tools() -> Vec<ToolDescriptor> {
    ToolName::ALL.iter().map(ToolName::descriptor).collect()
}
