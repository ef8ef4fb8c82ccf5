//! Scripted backend used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::api::client::{ApiClient, ApiFuture};
use crate::api::wire::{ConversationFilter, ConversationPage, OutgoingMessage, Pagination};
use crate::core::errors::{SyncError, SyncResult};
use crate::core::ids::ConversationId;
use crate::model::{Conversation, Message, StateAction, User};

/// A request the scripted backend received.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ApiCall {
    List(ConversationFilter),
    Messages(ConversationId),
    Send(ConversationId, OutgoingMessage),
    ChangeState(ConversationId, StateAction, Option<String>),
    ValidateToken,
    Typing(ConversationId, bool),
}

/// Scripted answer to `send_message`.
pub(crate) enum SendReply {
    Echo(Message),
    Accepted,
    Fail(u16),
}

#[derive(Default)]
struct Script {
    conversations: Vec<Conversation>,
    list_delays: VecDeque<Duration>,
    list_failures: usize,
    messages: HashMap<ConversationId, Vec<Message>>,
    message_delays: HashMap<ConversationId, Duration>,
    failing_threads: HashSet<ConversationId>,
    send_replies: VecDeque<SendReply>,
    fail_state_changes: bool,
    token_failure: Option<u16>,
    calls: Vec<ApiCall>,
}

/// In-memory [`ApiClient`] whose answers tests set up front.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    script: Mutex<Script>,
}

impl ScriptedApi {
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.script().conversations = conversations;
    }

    pub(crate) fn delay_next_list(&self, delay: Duration) {
        self.script().list_delays.push_back(delay);
    }

    pub(crate) fn fail_next_lists(&self, count: usize) {
        self.script().list_failures = count;
    }

    pub(crate) fn set_messages(&self, conversation_id: &ConversationId, messages: Vec<Message>) {
        self.script().messages.insert(conversation_id.clone(), messages);
    }

    pub(crate) fn delay_messages(&self, conversation_id: &ConversationId, delay: Duration) {
        self.script().message_delays.insert(conversation_id.clone(), delay);
    }

    pub(crate) fn fail_thread(&self, conversation_id: &ConversationId, fail: bool) {
        let mut script = self.script();
        if fail {
            script.failing_threads.insert(conversation_id.clone());
        } else {
            script.failing_threads.remove(conversation_id);
        }
    }

    pub(crate) fn push_send_reply(&self, reply: SendReply) {
        self.script().send_replies.push_back(reply);
    }

    pub(crate) fn fail_state_changes(&self, fail: bool) {
        self.script().fail_state_changes = fail;
    }

    pub(crate) fn reject_token(&self, reject: bool) {
        self.script().token_failure = reject.then_some(401);
    }

    pub(crate) fn fail_token_checks(&self, status: u16) {
        self.script().token_failure = Some(status);
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        self.script().calls.clone()
    }
}

impl ApiClient for ScriptedApi {
    fn list_conversations(&self, filter: ConversationFilter) -> ApiFuture<'_, SyncResult<ConversationPage>> {
        let (delay, result) = {
            let mut script = self.script();
            script.calls.push(ApiCall::List(filter.clone()));
            let delay = script.list_delays.pop_front().unwrap_or_default();
            let result = if script.list_failures > 0 {
                script.list_failures -= 1;
                Err(SyncError::api(503, "unavailable"))
            } else {
                Ok(page(&script.conversations, &filter))
            };
            (delay, result)
        };
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            result
        })
    }

    fn conversation_messages(&self, conversation_id: ConversationId) -> ApiFuture<'_, SyncResult<Vec<Message>>> {
        let (delay, result) = {
            let mut script = self.script();
            script.calls.push(ApiCall::Messages(conversation_id.clone()));
            let delay = script
                .message_delays
                .get(&conversation_id)
                .copied()
                .unwrap_or_default();
            let result = if script.failing_threads.contains(&conversation_id) {
                Err(SyncError::api(503, "unavailable"))
            } else {
                Ok(script.messages.get(&conversation_id).cloned().unwrap_or_default())
            };
            (delay, result)
        };
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            result
        })
    }

    fn send_message(
        &self,
        conversation_id: ConversationId,
        message: OutgoingMessage,
    ) -> ApiFuture<'_, SyncResult<Option<Message>>> {
        let result = {
            let mut script = self.script();
            script.calls.push(ApiCall::Send(conversation_id.clone(), message));
            match script.send_replies.pop_front().unwrap_or(SendReply::Accepted) {
                SendReply::Echo(echo) => {
                    script
                        .messages
                        .entry(conversation_id)
                        .or_default()
                        .push(echo.clone());
                    Ok(Some(echo))
                }
                SendReply::Accepted => Ok(None),
                SendReply::Fail(status) => Err(SyncError::api(status, "send failed")),
            }
        };
        Box::pin(async move { result })
    }

    fn change_state(
        &self,
        conversation_id: ConversationId,
        action: StateAction,
        reason: Option<String>,
    ) -> ApiFuture<'_, SyncResult<()>> {
        let result = {
            let mut script = self.script();
            script
                .calls
                .push(ApiCall::ChangeState(conversation_id.clone(), action, reason));
            if script.fail_state_changes {
                Err(SyncError::api(500, "state change failed"))
            } else {
                if let Some(c) = script.conversations.iter_mut().find(|c| c.id == conversation_id) {
                    c.set_state(action.target_state());
                }
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn validate_token(&self) -> ApiFuture<'_, SyncResult<User>> {
        let result = {
            let mut script = self.script();
            script.calls.push(ApiCall::ValidateToken);
            match script.token_failure {
                Some(401) => Err(SyncError::Unauthorized),
                Some(status) => Err(SyncError::api(status, "validation failed")),
                None => Ok(User {
                    id: "1".to_string(),
                    name: "Agent".to_string(),
                    email: "agent@example.com".to_string(),
                }),
            }
        };
        Box::pin(async move { result })
    }

    fn send_typing(&self, conversation_id: ConversationId, is_typing: bool) -> ApiFuture<'_, SyncResult<()>> {
        self.script().calls.push(ApiCall::Typing(conversation_id, is_typing));
        Box::pin(async { Ok(()) })
    }
}

fn page(conversations: &[Conversation], filter: &ConversationFilter) -> ConversationPage {
    let needle = filter.search.as_deref().map(str::to_lowercase);
    let matching: Vec<Conversation> = conversations
        .iter()
        .filter(|c| filter.admits(c.state))
        .filter(|c| {
            needle
                .as_deref()
                .is_none_or(|n| c.name.to_lowercase().contains(n))
        })
        .cloned()
        .collect();

    let limit = filter.limit.max(1) as usize;
    let page = filter.page.max(1);
    let total_pages = u32::try_from(matching.len().div_ceil(limit)).unwrap_or(u32::MAX);
    let items = matching
        .iter()
        .skip((page as usize - 1) * limit)
        .take(limit)
        .cloned()
        .collect();
    ConversationPage {
        items,
        pagination: Pagination {
            total: matching.len() as u64,
            total_pages,
            page,
        },
    }
}

/// Conversation summary with the given id, name and state.
pub(crate) fn conversation(id: u64, name: &str, state: crate::model::ConversationState) -> Conversation {
    Conversation {
        id: ConversationId::from(id),
        name: name.to_string(),
        initial: String::new(),
        avatar_color: None,
        state,
        status: None,
        last_message: None,
        last_message_at: None,
        is_read: true,
        has_new_messages: false,
        visitor: crate::model::VisitorMeta::default(),
    }
    .normalized()
}
