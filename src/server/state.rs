//! In-memory backend data shared across all request handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::core::ids::{ConversationId, MessageId};
use crate::model::{
    Conversation, ConversationState, Message, MessageKind, OnboardingState, SenderType, User,
    VisitorMeta, WidgetPosition, WidgetSettings,
};
use crate::realtime::LocalPushHub;
use crate::realtime::events::{NEW_CONVERSATION, NEW_MESSAGE, TYPING};

/// Channel the mock announces new conversations on.
pub const GLOBAL_CHANNEL: &str = "conversations";

/// Steps of the onboarding wizard; submitting the last one completes it.
pub const ONBOARDING_STEPS: u32 = 4;

struct Account {
    user: User,
    password: String,
    onboarding: OnboardingState,
}

struct Thread {
    summary: Conversation,
    messages: Vec<Message>,
    close_reason: Option<String>,
}

#[derive(Default)]
struct MockData {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    threads: Vec<Thread>,
    next_id: u64,
}

impl MockData {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn thread_mut(&mut self, id: &ConversationId) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| &t.summary.id == id)
    }
}

/// Outcome of a conversation state change.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    /// Applied.
    Done(ConversationState),
    /// No such conversation.
    Missing,
    /// Not allowed from the current state.
    Rejected(ConversationState),
}

/// Shared backend state.
pub struct MockState {
    data: Mutex<MockData>,
    push: Option<Arc<LocalPushHub>>,
    widget: WidgetSettings,
}

impl MockState {
    /// Empty backend; events go to `push` when given.
    #[must_use]
    pub fn new(push: Option<Arc<LocalPushHub>>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(MockData::default()),
            push,
            widget: WidgetSettings {
                widget_id: format!("wk_{}", Uuid::new_v4().simple()),
                color: "#4f46e5".to_string(),
                greeting: Some("Hi! How can we help?".to_string()),
                position: WidgetPosition::BottomRight,
                script_url: None,
            },
        })
    }

    /// Backend with a demo agent and two waiting visitors.
    #[must_use]
    pub fn demo(push: Option<Arc<LocalPushHub>>) -> Arc<Self> {
        let state = Self::new(push);
        state.add_account("Demo Agent", "demo@example.com", "demo");
        let alice = state.open_conversation("Alice Martin");
        state.visitor_message(&alice.id, "Hello, is anyone there?");
        let bob = state.open_conversation("Bob");
        state.visitor_message(&bob.id, "My order never arrived");
        state
    }

    fn lock(&self) -> MutexGuard<'_, MockData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, channel: &str, event: &str, payload: serde_json::Value) {
        if let Some(hub) = &self.push {
            let delivered = hub.publish(channel, event, payload);
            debug!(channel, event, delivered, "Mock push");
        }
    }

    /// Register an account. Returns `None` if the email is taken.
    pub fn add_account(&self, name: &str, email: &str, password: &str) -> Option<User> {
        let mut data = self.lock();
        let key = email.trim().to_ascii_lowercase();
        if data.accounts.contains_key(&key) {
            return None;
        }
        let user = User {
            id: data.next_id().to_string(),
            name: name.to_string(),
            email: email.trim().to_string(),
        };
        data.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: password.to_string(),
                onboarding: OnboardingState {
                    current_step: 1,
                    ..OnboardingState::default()
                },
            },
        );
        Some(user)
    }

    /// Check credentials and issue a fresh token.
    pub fn login(&self, email: &str, password: &str) -> Option<(String, User)> {
        let mut data = self.lock();
        let key = email.trim().to_ascii_lowercase();
        let user = data
            .accounts
            .get(&key)
            .filter(|account| account.password == password)?
            .user
            .clone();
        let token = Uuid::new_v4().to_string();
        data.tokens.insert(token.clone(), key);
        Some((token, user))
    }

    /// User a token belongs to.
    #[must_use]
    pub fn user_for(&self, token: &str) -> Option<User> {
        let data = self.lock();
        let key = data.tokens.get(token)?;
        data.accounts.get(key).map(|a| a.user.clone())
    }

    /// Invalidate a token; subsequent requests with it get 401.
    pub fn revoke(&self, token: &str) -> bool {
        self.lock().tokens.remove(token).is_some()
    }

    /// Onboarding progress of the token's account.
    #[must_use]
    pub fn onboarding(&self, token: &str) -> Option<OnboardingState> {
        let data = self.lock();
        let key = data.tokens.get(token)?;
        data.accounts.get(key).map(|a| a.onboarding.clone())
    }

    /// Apply `change` to the token's onboarding progress.
    pub fn update_onboarding(
        &self,
        token: &str,
        change: impl FnOnce(&mut OnboardingState),
    ) -> Option<OnboardingState> {
        let mut data = self.lock();
        let key = data.tokens.get(token)?.clone();
        let account = data.accounts.get_mut(&key)?;
        change(&mut account.onboarding);
        Some(account.onboarding.clone())
    }

    /// Widget settings.
    #[must_use]
    pub const fn widget(&self) -> &WidgetSettings {
        &self.widget
    }

    /// A visitor opened the chat: create a pending conversation and announce it.
    pub fn open_conversation(&self, visitor_name: &str) -> Conversation {
        let conversation = {
            let mut data = self.lock();
            let id = data.next_id();
            let summary = Conversation {
                id: ConversationId::from(id),
                name: visitor_name.to_string(),
                initial: String::new(),
                avatar_color: None,
                state: ConversationState::Pending,
                status: None,
                last_message: None,
                last_message_at: Some(Utc::now()),
                is_read: false,
                has_new_messages: false,
                visitor: VisitorMeta::default(),
            }
            .normalized();
            data.threads.push(Thread {
                summary: summary.clone(),
                messages: Vec::new(),
                close_reason: None,
            });
            summary
        };
        self.publish(GLOBAL_CHANNEL, NEW_CONVERSATION, json!({ "conversation": conversation }));
        conversation
    }

    /// A visitor wrote in `conversation_id`.
    pub fn visitor_message(&self, conversation_id: &ConversationId, content: &str) -> Option<Message> {
        self.append(conversation_id, SenderType::Visitor, |message| {
            message.content = content.to_string();
        })
    }

    /// The agent wrote in `conversation_id`.
    pub fn agent_message(&self, conversation_id: &ConversationId, content: &str) -> Option<Message> {
        self.append(conversation_id, SenderType::Agent, |message| {
            message.content = content.to_string();
        })
    }

    /// The agent uploaded a file to `conversation_id`, optionally captioned.
    pub fn agent_file(
        &self,
        conversation_id: &ConversationId,
        name: &str,
        mime: &str,
        size: u64,
        caption: Option<&str>,
    ) -> Option<Message> {
        self.append(conversation_id, SenderType::Agent, |message| {
            if let Some(caption) = caption {
                message.content = caption.to_string();
            }
            message.kind = MessageKind::for_mime(mime);
            message.file_url = Some(format!("/files/{}/{name}", message.id));
            message.file_name = Some(name.to_string());
            message.file_size = Some(size);
        })
    }

    fn append(
        &self,
        conversation_id: &ConversationId,
        sender: SenderType,
        fill: impl FnOnce(&mut Message),
    ) -> Option<Message> {
        let message = {
            let mut data = self.lock();
            let id = data.next_id();
            let thread = data.thread_mut(conversation_id)?;
            let mut message = Message::optimistic(
                MessageId::from(id),
                conversation_id.clone(),
                String::new(),
                Utc::now(),
            );
            message.temp = false;
            message.is_delivered = true;
            message.sender_type = sender;
            fill(&mut message);

            thread.summary.last_message = Some(message.preview_text());
            thread.summary.last_message_at = Some(message.created_at);
            if sender == SenderType::Visitor {
                thread.summary.is_read = false;
                thread.summary.has_new_messages = true;
            } else if thread.summary.state == ConversationState::Pending {
                thread.summary.set_state(ConversationState::Active);
            }
            thread.messages.push(message.clone());
            message
        };
        self.publish(
            &conversation_id.channel_name(),
            NEW_MESSAGE,
            json!({ "message": message }),
        );
        Some(message)
    }

    /// Relay a typing indicator to the conversation channel.
    pub fn typing(&self, conversation_id: &ConversationId, sender: SenderType, is_typing: bool) -> bool {
        if !self.lock().threads.iter().any(|t| &t.summary.id == conversation_id) {
            return false;
        }
        self.publish(
            &conversation_id.channel_name(),
            TYPING,
            json!({ "sender_type": sender, "is_typing": is_typing }),
        );
        true
    }

    /// Conversations matching the filters, newest activity first.
    #[must_use]
    pub fn list(&self, status: Option<ConversationState>, search: Option<&str>) -> Vec<Conversation> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let mut items: Vec<Conversation> = self
            .lock()
            .threads
            .iter()
            .map(|t| &t.summary)
            .filter(|c| status.map_or(c.state != ConversationState::Archived, |s| c.state == s))
            .filter(|c| {
                needle.as_deref().is_none_or(|n| {
                    c.name.to_lowercase().contains(n)
                        || c.last_message
                            .as_deref()
                            .is_some_and(|m| m.to_lowercase().contains(n))
                })
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        items
    }

    /// Messages of a conversation; reading clears its unread flags.
    pub fn messages(&self, conversation_id: &ConversationId) -> Option<Vec<Message>> {
        let mut data = self.lock();
        let thread = data.thread_mut(conversation_id)?;
        thread.summary.is_read = true;
        thread.summary.has_new_messages = false;
        Some(thread.messages.clone())
    }

    /// Remember why the agent closed a conversation.
    pub fn record_close_reason(&self, conversation_id: &ConversationId, reason: &str) -> bool {
        let mut data = self.lock();
        let Some(thread) = data.thread_mut(conversation_id) else {
            return false;
        };
        thread.close_reason = Some(reason.to_string());
        true
    }

    /// Reason given when the conversation was last closed.
    #[must_use]
    pub fn close_reason(&self, conversation_id: &ConversationId) -> Option<String> {
        self.lock()
            .threads
            .iter()
            .find(|t| &t.summary.id == conversation_id)
            .and_then(|t| t.close_reason.clone())
    }

    /// Close, reopen or archive a conversation.
    pub fn transition(&self, conversation_id: &ConversationId, target: ConversationState) -> Transition {
        let mut data = self.lock();
        let Some(thread) = data.thread_mut(conversation_id) else {
            return Transition::Missing;
        };
        let current = thread.summary.state;
        if target == ConversationState::Active && current != ConversationState::Closed {
            return Transition::Rejected(current);
        }
        thread.summary.set_state(target);
        Transition::Done(target)
    }
}
