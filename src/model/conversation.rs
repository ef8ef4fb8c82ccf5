//! Conversation summary model and state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::ids::ConversationId;
use crate::model::time::{relative_label, timestamp_opt};

/// Lifecycle state of a conversation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Waiting for an agent to join.
    #[default]
    Pending,
    /// An agent is handling it.
    Active,
    /// Closed by an agent.
    Closed,
    /// Archived; hidden from the default inbox.
    Archived,
}

impl ConversationState {
    /// Stable string form, also used as the `status` query filter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "new" | "waiting" => Ok(Self::Pending),
            "active" | "open" | "opened" => Ok(Self::Active),
            "closed" | "resolved" => Ok(Self::Closed),
            "archived" => Ok(Self::Archived),
            _ => Err(value.to_string()),
        }
    }
}

/// Backend action that moves a conversation between states.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StateAction {
    /// `POST /conversations/{id}/close`.
    Close,
    /// `POST /conversations/{id}/reopen`.
    Reopen,
    /// `POST /conversations/{id}/archive`.
    Archive,
}

impl StateAction {
    /// Pick the backend action for a requested transition.
    ///
    /// Only `closed -> active` (reopen), `* -> closed` and `* -> archived` map to
    /// an action; anything else is a no-op.
    #[must_use]
    pub const fn for_transition(current: ConversationState, requested: ConversationState) -> Option<Self> {
        match (current, requested) {
            (ConversationState::Closed, ConversationState::Active) => Some(Self::Reopen),
            (_, ConversationState::Closed) => Some(Self::Close),
            (_, ConversationState::Archived) => Some(Self::Archive),
            _ => None,
        }
    }

    /// Path segment of the backend endpoint.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Reopen => "reopen",
            Self::Archive => "archive",
        }
    }

    /// State the conversation ends in once the action succeeds.
    #[must_use]
    pub const fn target_state(self) -> ConversationState {
        match self {
            Self::Close => ConversationState::Closed,
            Self::Reopen => ConversationState::Active,
            Self::Archive => ConversationState::Archived,
        }
    }
}

/// Visitor metadata shown in the info pane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorMeta {
    /// Visitor IP address.
    #[serde(default, alias = "visitor_ip")]
    pub ip: Option<String>,
    /// Browser user agent.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Referring page.
    #[serde(default)]
    pub referrer: Option<String>,
    /// Approximate location.
    #[serde(default)]
    pub location: Option<String>,
}

/// Conversation summary as listed in the inbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Identifier.
    pub id: ConversationId,
    /// Visitor display name.
    #[serde(default)]
    pub name: String,
    /// Avatar initial.
    #[serde(default)]
    pub initial: String,
    /// Avatar colour (CSS value).
    #[serde(default)]
    pub avatar_color: Option<String>,
    /// Client-side lifecycle state.
    #[serde(default)]
    pub state: ConversationState,
    /// Raw backend status, mirrored.
    #[serde(default)]
    pub status: Option<String>,
    /// Last message preview.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Time of the last message.
    #[serde(default, with = "timestamp_opt")]
    pub last_message_at: Option<DateTime<Utc>>,
    /// The agent has read the latest message.
    #[serde(default)]
    pub is_read: bool,
    /// New visitor messages arrived since the agent last looked.
    #[serde(default)]
    pub has_new_messages: bool,
    /// Visitor metadata.
    #[serde(default, flatten)]
    pub visitor: VisitorMeta,
}

impl Conversation {
    /// Fill derived fields after decoding a backend payload.
    ///
    /// A recognizable backend `status` wins over `state`; `initial` is taken
    /// from the name when missing.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if let Some(state) = self.status.as_deref().and_then(|s| s.parse().ok()) {
            self.state = state;
        }
        if self.status.is_none() {
            self.status = Some(self.state.as_str().to_string());
        }
        if self.initial.is_empty() {
            self.initial = self
                .name
                .chars()
                .find(|c| c.is_alphanumeric())
                .map_or_else(|| "?".to_string(), |c| c.to_uppercase().collect());
        }
        self
    }

    /// Set the state and keep the mirrored status in line.
    pub fn set_state(&mut self, state: ConversationState) {
        self.state = state;
        self.status = Some(state.as_str().to_string());
    }

    /// Relative-time label for the last message.
    #[must_use]
    pub fn last_message_label(&self, now: DateTime<Utc>) -> Option<String> {
        self.last_message_at.map(|at| relative_label(at, now))
    }

    /// Whether the list row should render as unread.
    #[must_use]
    pub const fn is_unread(&self) -> bool {
        !self.is_read || self.has_new_messages
    }
}
