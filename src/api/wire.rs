//! Request and response shapes of the REST backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{SyncError, SyncResult};
use crate::model::{Conversation, ConversationState};

/// Inbox query parameters for `GET /conversations`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationFilter {
    /// Restrict to one state; `None` lists everything but archived.
    pub status: Option<ConversationState>,
    /// Free-text search over name and last message.
    pub search: Option<String>,
    /// 1-based page.
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

impl Default for ConversationFilter {
    fn default() -> Self {
        Self {
            status: None,
            search: None,
            page: 1,
            limit: 20,
        }
    }
}

impl ConversationFilter {
    /// Query pairs in the order the backend documents them.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            pairs.push(("search", search.to_string()));
        }
        pairs.push(("page", self.page.max(1).to_string()));
        pairs.push(("limit", self.limit.to_string()));
        pairs
    }

    /// Whether a conversation in `state` would be listed under this filter.
    #[must_use]
    pub fn admits(&self, state: ConversationState) -> bool {
        self.status.map_or(state != ConversationState::Archived, |s| s == state)
    }
}

/// Pagination block of a conversation page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Total conversations matching the filter.
    #[serde(default)]
    pub total: u64,
    /// Number of pages.
    #[serde(default)]
    pub total_pages: u32,
    /// Current page.
    #[serde(default = "first_page")]
    pub page: u32,
}

const fn first_page() -> u32 {
    1
}

impl Pagination {
    /// Whether a later page exists.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// One page of conversation summaries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationPage {
    /// Summaries in backend order.
    pub items: Vec<Conversation>,
    /// Pagination info.
    pub pagination: Pagination,
}

/// Raw shape of `GET /conversations`.
#[derive(Debug, Deserialize)]
pub(crate) struct ConversationListBody {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

impl From<ConversationListBody> for ConversationPage {
    fn from(body: ConversationListBody) -> Self {
        Self {
            items: body
                .conversations
                .into_iter()
                .map(Conversation::normalized)
                .collect(),
            pagination: body.pagination,
        }
    }
}

/// Outgoing message payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// JSON `{content}`.
    Text(String),
    /// Multipart upload under the `file` field, with an optional `content` caption.
    File {
        /// File name.
        name: String,
        /// MIME type.
        mime: String,
        /// File contents.
        bytes: Vec<u8>,
        /// Text sent alongside the file.
        caption: Option<String>,
    },
}

/// Body of `POST /conversations/{id}/close`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    /// Why the agent closed the conversation; may be empty.
    #[serde(default)]
    pub reason: String,
}

/// Body of `POST /typing`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingRequest {
    /// Conversation the agent is typing in.
    pub conversation_id: String,
    /// Typing or stopped.
    pub is_typing: bool,
}

/// Reject `{"status": "error"}` envelopes that arrive with a 2xx code.
///
/// # Errors
/// Returns `SyncError::Api` carrying the backend message.
pub fn check_envelope(status: u16, body: &Value) -> SyncResult<()> {
    if body.get("status").and_then(Value::as_str) == Some("error") {
        return Err(SyncError::api(status, error_message(body).unwrap_or("unknown error")));
    }
    Ok(())
}

/// Extract a human-readable error message from a backend body.
#[must_use]
pub fn error_message(body: &Value) -> Option<&str> {
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
}
