//! Normalization of push payloads into typed events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::errors::SyncResult;
use crate::core::ids::ConversationId;
use crate::model::{Conversation, Message, SenderType};

/// Event name for a message posted to a conversation channel.
pub const NEW_MESSAGE: &str = "new-message";
/// Event name for a typing indicator.
pub const TYPING: &str = "typing";
/// Event name for a conversation announced on the global channel.
pub const NEW_CONVERSATION: &str = "new-conversation";

/// Someone started or stopped typing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    /// Who is typing.
    #[serde(default)]
    pub sender_type: SenderType,
    /// Started (`true`) or stopped.
    #[serde(default)]
    pub is_typing: bool,
}

/// A push event after normalization.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// A message for the channel's conversation.
    NewMessage(Message),
    /// A typing indicator for the channel's conversation.
    Typing(TypingEvent),
    /// A conversation created on the backend.
    NewConversation(Conversation),
}

/// Decode an application event.
///
/// `new-message` payloads are accepted both bare and wrapped in
/// `{"message": {...}}`; a missing `conversation_id` is filled from the
/// channel. Unknown event names yield `Ok(None)`.
///
/// # Errors
/// Returns an error if a known event carries a payload that does not decode.
pub fn normalize(
    conversation_id: Option<&ConversationId>,
    name: &str,
    payload: Value,
) -> SyncResult<Option<ChannelEvent>> {
    let name = name.trim_start_matches('.');
    let event = match name {
        NEW_MESSAGE => {
            let raw = unwrap_field(payload, "message");
            let mut message: Message = serde_json::from_value(raw)?;
            if let Some(id) = conversation_id {
                message.conversation_id.get_or_insert_with(|| id.clone());
            }
            ChannelEvent::NewMessage(message)
        }
        TYPING => ChannelEvent::Typing(serde_json::from_value(payload)?),
        NEW_CONVERSATION => {
            let raw = unwrap_field(payload, "conversation");
            let conversation: Conversation = serde_json::from_value(raw)?;
            ChannelEvent::NewConversation(conversation.normalized())
        }
        other => {
            debug!(event = other, "Dropping unknown push event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn unwrap_field(payload: Value, field: &str) -> Value {
    match payload {
        Value::Object(mut map) if map.get(field).is_some_and(Value::is_object) => {
            map.remove(field).unwrap_or(Value::Null)
        }
        other => other,
    }
}
