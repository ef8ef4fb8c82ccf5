//! Chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::ids::{ConversationId, MessageId};
use crate::model::time::timestamp;

/// Kind of message payload.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment.
    Image,
    /// Any other file attachment.
    File,
    /// System notice (joined, closed, ...).
    System,
}

impl MessageKind {
    /// Pick the attachment kind for a MIME type.
    #[must_use]
    pub fn for_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }
}

/// Who wrote a message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    /// Support agent using the dashboard.
    Agent,
    /// Website visitor.
    #[default]
    Visitor,
    /// AI agent.
    Bot,
    /// Backend-generated.
    System,
}

impl SenderType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Visitor => "visitor",
            Self::Bot => "bot",
            Self::System => "system",
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a conversation thread, as fetched, pushed, or created locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, or `temp-<millis>` for an optimistic placeholder.
    pub id: MessageId,
    /// Owning conversation; filled from context when the payload omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Payload kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Author class.
    #[serde(default)]
    pub sender_type: SenderType,
    /// Text content (file name for attachments).
    #[serde(default, alias = "body")]
    pub content: String,
    /// Attachment URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Attachment file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Attachment size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Creation time.
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Delivered to the visitor.
    #[serde(default)]
    pub is_delivered: bool,
    /// Read by the recipient.
    #[serde(default)]
    pub is_read: bool,
    /// Local placeholder awaiting server confirmation.
    #[serde(default)]
    pub temp: bool,
    /// Local placeholder whose send failed.
    #[serde(default, alias = "sendFailed")]
    pub failed: bool,
}

impl Message {
    /// Build an optimistic text placeholder authored by the agent.
    #[must_use]
    pub fn optimistic(
        id: MessageId,
        conversation_id: ConversationId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id: Some(conversation_id),
            kind: MessageKind::Text,
            sender_type: SenderType::Agent,
            content: content.into(),
            file_url: None,
            file_name: None,
            file_size: None,
            created_at,
            is_delivered: false,
            is_read: false,
            temp: true,
            failed: false,
        }
    }

    /// Whether this entry is a local placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.temp || self.id.is_temp()
    }

    /// Whether the message belongs to `conversation_id` (unknown owner counts as yes).
    #[must_use]
    pub fn belongs_to(&self, conversation_id: &ConversationId) -> bool {
        self.conversation_id
            .as_ref()
            .is_none_or(|owner| owner == conversation_id)
    }

    /// One-line preview used by the inbox list.
    #[must_use]
    pub fn preview_text(&self) -> String {
        match self.kind {
            MessageKind::Text | MessageKind::System => self.content.clone(),
            MessageKind::Image => "Sent an image".to_string(),
            MessageKind::File => format!(
                "Sent a file: {}",
                self.file_name.as_deref().unwrap_or(&self.content)
            ),
        }
    }
}
