//! State of the thread shown in the chat view.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::chat::reducer::{self, Applied};
use crate::core::ids::{ConversationId, MessageId};
use crate::model::Message;

/// Lifecycle of an open thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Nothing to show yet; history is loading.
    #[default]
    InitialLoading,
    /// Full history merged.
    Loaded,
    /// Content is on screen while a fetch runs.
    BackgroundRefreshing,
    /// Loaded and no fetch in flight.
    Idle,
    /// The conversation was deselected.
    Closed,
}

/// Messages of one conversation plus load status.
#[derive(Clone, Debug)]
pub struct ThreadState {
    conversation_id: ConversationId,
    messages: Vec<Message>,
    status: ThreadStatus,
    last_error: Option<String>,
    echo_window: Duration,
    last_temp_millis: i64,
}

impl ThreadState {
    /// Empty thread awaiting its first load.
    #[must_use]
    pub const fn new(conversation_id: ConversationId, echo_window: Duration) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            status: ThreadStatus::InitialLoading,
            last_error: None,
            echo_window,
            last_temp_millis: 0,
        }
    }

    /// Seed from the process-wide cache; the thread shows it while history loads.
    pub fn seed(&mut self, cached: Vec<Message>) {
        if cached.is_empty() {
            return;
        }
        self.merge(cached);
        self.status = ThreadStatus::BackgroundRefreshing;
    }

    /// Conversation this thread belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ThreadStatus {
        self.status
    }

    /// Last fetch error, kept for an inline retry affordance.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn set_status(&mut self, status: ThreadStatus) {
        self.status = status;
    }

    /// A fetch is starting.
    pub(crate) fn begin_fetch(&mut self) {
        if self.status != ThreadStatus::InitialLoading {
            self.status = ThreadStatus::BackgroundRefreshing;
        }
    }

    /// A fetch finished with `fetched`. Returns how many entries it added.
    pub(crate) fn finish_fetch(&mut self, fetched: Vec<Message>) -> usize {
        let first = self.status == ThreadStatus::InitialLoading;
        let before = self.messages.len();
        self.merge(fetched);
        let added = self.messages.len().saturating_sub(before);
        self.last_error = None;
        self.status = if first {
            ThreadStatus::Loaded
        } else {
            ThreadStatus::Idle
        };
        added
    }

    /// A fetch failed; keep whatever is on screen.
    pub(crate) fn fail_fetch(&mut self, error: String) {
        self.last_error = Some(error);
        if self.status == ThreadStatus::BackgroundRefreshing {
            self.status = ThreadStatus::Idle;
        }
    }

    /// Merge a fetched batch, dropping messages of other conversations.
    pub fn merge(&mut self, fetched: Vec<Message>) {
        let fetched = fetched
            .into_iter()
            .filter(|m| m.belongs_to(&self.conversation_id))
            .collect();
        self.messages = reducer::reconcile(&self.messages, fetched, self.echo_window);
    }

    /// Fold one message in. `None` when it belongs to another conversation.
    pub fn apply(&mut self, message: Message) -> Option<Applied> {
        if !message.belongs_to(&self.conversation_id) {
            return None;
        }
        Some(reducer::apply_message(
            &mut self.messages,
            message,
            self.echo_window,
        ))
    }

    /// Remove an entry by id.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        reducer::remove_message(&mut self.messages, id)
    }

    /// Flag a placeholder as failed.
    pub fn mark_failed(&mut self, id: &MessageId) -> bool {
        reducer::mark_failed(&mut self.messages, id)
    }

    /// Placeholder id unique within this thread, derived from `now`.
    pub fn next_temp_id(&mut self, now: DateTime<Utc>) -> MessageId {
        let millis = now.timestamp_millis().max(self.last_temp_millis + 1);
        self.last_temp_millis = millis;
        MessageId::temp(millis)
    }

    /// Failed placeholders awaiting retry.
    pub fn failed(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.failed)
    }
}
