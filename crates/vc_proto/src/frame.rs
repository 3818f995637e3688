//! Realtime frames exchanged over the chat socket.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Inbound
//! frames that omit `type` dispatch under the default `message` event;
//! unrecognised types are preserved verbatim for forward compatibility
//! instead of being dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// Payload kind of an outbound chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// `{ "type": "chat_message", "message": .., "message_type": .., ...metadata }`
    #[serde(rename = "chat_message")]
    ChatMessage {
        message: Value,
        message_type: MessageKind,
        #[serde(flatten)]
        metadata: Map<String, Value>,
    },
    #[serde(rename = "typing")]
    Typing,
    #[serde(rename = "read_receipt")]
    ReadReceipt { message_ids: Vec<u64> },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// Chat message payload as delivered by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub message: Value,
    #[serde(default)]
    pub message_type: MessageKind,
    /// Everything else the server attaches (sender, timestamps, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypingPayload {
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagesReadPayload {
    pub message_ids: Vec<u64>,
    #[serde(default)]
    pub read_by_user_id: Option<u64>,
    #[serde(default)]
    pub read_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserStatusPayload {
    pub user_id: u64,
    #[serde(default)]
    pub username: Option<String>,
    pub status: String,
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    ChatMessage(ChatMessagePayload),
    Typing(TypingPayload),
    MessagesRead(MessagesReadPayload),
    UserStatus(UserStatusPayload),
    Error { message: String },
    /// Frame without a `type` discriminator; dispatched as the default
    /// `message` event.
    Message(Value),
    /// Unrecognised `type`; payload preserved verbatim.
    Unknown { kind: String, payload: Value },
}

impl ServerFrame {
    /// Parse a raw text frame. Malformed JSON or a non-object payload is a
    /// typed error; the transport logs and drops such frames.
    pub fn parse(text: &str) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(ProtoError::MalformedFrame("frame is not a JSON object".into()));
        }

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let frame = match kind.as_deref() {
            None => ServerFrame::Message(value),
            Some("chat_message") => ServerFrame::ChatMessage(serde_json::from_value(value)?),
            // The server labels relayed typing indicators "user_typing".
            Some("typing") | Some("user_typing") => {
                ServerFrame::Typing(serde_json::from_value(value)?)
            }
            Some("messages_read") => ServerFrame::MessagesRead(serde_json::from_value(value)?),
            Some("user_status") => ServerFrame::UserStatus(serde_json::from_value(value)?),
            Some("error") => {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                ServerFrame::Error { message }
            }
            Some(other) => ServerFrame::Unknown {
                kind: other.to_owned(),
                payload: value,
            },
        };
        Ok(frame)
    }

    /// Subscription key this frame dispatches under.
    pub fn kind(&self) -> EventKind {
        match self {
            ServerFrame::ChatMessage(_) => EventKind::ChatMessage,
            ServerFrame::Typing(_) => EventKind::Typing,
            ServerFrame::MessagesRead(_) => EventKind::MessagesRead,
            ServerFrame::UserStatus(_) => EventKind::UserStatus,
            ServerFrame::Error { .. } => EventKind::ServerError,
            ServerFrame::Message(_) => EventKind::Message,
            ServerFrame::Unknown { kind, .. } => EventKind::Other(kind.clone()),
        }
    }
}

/// Subscription key for transport event dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ChatMessage,
    Typing,
    MessagesRead,
    UserStatus,
    ServerError,
    /// Default event for frames without a `type` discriminator.
    Message,
    /// Any frame type without a dedicated variant.
    Other(String),
}
