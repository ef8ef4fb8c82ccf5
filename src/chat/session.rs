//! The chat session: the single open thread and everything that mutates it.
//!
//! Every asynchronous completion (history fetch, background poll, send
//! confirmation, push) carries the [`SelectionToken`] it was started under
//! and is dropped if the user has since selected another conversation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiFuture, OutgoingMessage};
use crate::chat::cache::MessageCache;
use crate::chat::grouping::{DateGroup, group_by_date};
use crate::chat::reducer::Applied;
use crate::chat::scroll::ScrollTracker;
use crate::chat::thread::{ThreadState, ThreadStatus};
use crate::core::errors::{SyncError, SyncResult};
use crate::core::ids::{ConversationId, MessageId};
use crate::model::{Message, MessageKind, SenderType};
use crate::realtime::{
    ConversationListener, RealtimeClient, SubscriptionHandle, TypingEvent, TypingIndicators,
    TypingPublisher,
};
use crate::refresh::RefreshJob;

/// Identifies one selection of a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionToken {
    conversation_id: ConversationId,
    epoch: u64,
}

impl SelectionToken {
    /// Conversation selected.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

/// Result of a send.
#[derive(Debug)]
pub enum SendOutcome {
    /// The backend returned the created message; the placeholder is gone.
    Confirmed {
        /// Placeholder id.
        local_id: MessageId,
        /// Server id.
        message_id: MessageId,
    },
    /// Accepted without an echo; the placeholder waits for push or poll.
    AwaitingEcho {
        /// Placeholder id.
        local_id: MessageId,
    },
    /// The request failed; the placeholder is marked failed.
    Failed {
        /// Placeholder id.
        local_id: MessageId,
        /// Why.
        error: SyncError,
    },
}

impl SendOutcome {
    /// Placeholder id of the send.
    #[must_use]
    pub const fn local_id(&self) -> &MessageId {
        match self {
            Self::Confirmed { local_id, .. }
            | Self::AwaitingEcho { local_id }
            | Self::Failed { local_id, .. } => local_id,
        }
    }
}

struct SessionState {
    epoch: u64,
    current: Option<SelectionToken>,
    thread: Option<ThreadState>,
    subscription: Option<(ConversationId, SubscriptionHandle)>,
    failed_sends: HashMap<MessageId, OutgoingMessage>,
    scroll: ScrollTracker,
    typing_out: Option<Arc<TypingPublisher>>,
}

impl SessionState {
    fn thread_for(&mut self, token: &SelectionToken) -> Option<&mut ThreadState> {
        if self.current.as_ref() == Some(token) {
            self.thread.as_mut()
        } else {
            None
        }
    }
}

/// Chat session shared by the UI, the refresh worker and push listeners.
pub struct ChatSession {
    me: Weak<ChatSession>,
    api: Arc<dyn ApiClient>,
    cache: Arc<MessageCache>,
    realtime: Arc<RealtimeClient>,
    echo_window: Duration,
    typing: TypingIndicators,
    typing_idle: Duration,
    state: Mutex<SessionState>,
}

impl ChatSession {
    /// Create a session with nothing selected.
    ///
    /// `typing_ttl` expires the other side's indicator; `typing_idle` is how
    /// long the agent's own indicator stays on after the last keystroke.
    #[must_use]
    pub fn new(
        api: Arc<dyn ApiClient>,
        cache: Arc<MessageCache>,
        realtime: Arc<RealtimeClient>,
        echo_window: Duration,
        typing_ttl: Duration,
        typing_idle: Duration,
        scroll_pause: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            api,
            cache,
            realtime,
            echo_window,
            typing: TypingIndicators::new(typing_ttl),
            typing_idle,
            state: Mutex::new(SessionState {
                epoch: 0,
                current: None,
                thread: None,
                subscription: None,
                failed_sends: HashMap::new(),
                scroll: ScrollTracker::new(scroll_pause),
                typing_out: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select a conversation: show cached content, then join its channel.
    ///
    /// A failed channel subscription is logged; polling keeps the thread fresh.
    pub async fn select(&self, conversation_id: &ConversationId) -> SelectionToken {
        let publisher = Arc::new(TypingPublisher::new(
            Arc::clone(&self.realtime),
            conversation_id.clone(),
            self.typing_idle,
        ));
        let (token, previous, previous_typing) = {
            let mut state = self.lock();
            state.epoch += 1;
            let token = SelectionToken {
                conversation_id: conversation_id.clone(),
                epoch: state.epoch,
            };
            let mut thread = ThreadState::new(conversation_id.clone(), self.echo_window);
            if let Some(cached) = self.cache.get(conversation_id) {
                thread.seed(cached);
            }
            state.thread = Some(thread);
            state.current = Some(token.clone());
            state.failed_sends.clear();
            state.scroll.reset();
            let previous_typing = state.typing_out.replace(publisher);
            (token, state.subscription.take(), previous_typing)
        };
        info!(%conversation_id, "Conversation selected");
        stop_typing(previous_typing).await;

        if let Some((old, handle)) = previous {
            self.realtime.unsubscribe(&old, handle).await;
            self.typing.clear(&old);
        }

        let listener = Arc::new(ThreadListener {
            session: self.me.clone(),
            token: token.clone(),
        });
        match self.realtime.subscribe(conversation_id, listener).await {
            Ok(handle) => {
                let stale = {
                    let mut state = self.lock();
                    if state.current.as_ref() == Some(&token) {
                        state.subscription = Some((conversation_id.clone(), handle));
                        false
                    } else {
                        true
                    }
                };
                if stale {
                    self.realtime.unsubscribe(conversation_id, handle).await;
                }
            }
            Err(err) => {
                warn!(%conversation_id, "Realtime unavailable, relying on polling: {err}");
            }
        }
        token
    }

    /// Select and load history.
    ///
    /// # Errors
    /// Returns an error if the history fetch fails.
    pub async fn open(&self, conversation_id: &ConversationId) -> SyncResult<SelectionToken> {
        let token = self.select(conversation_id).await;
        self.load(&token).await?;
        Ok(token)
    }

    /// Fetch full history and merge it into the thread and the cache.
    ///
    /// History that arrives after another selection is still merged into the
    /// cache for its own conversation, never into the active thread.
    ///
    /// # Errors
    /// Returns an error if the fetch fails; the thread keeps it as `last_error`.
    pub async fn load(&self, token: &SelectionToken) -> SyncResult<()> {
        if let Some(thread) = self.lock().thread_for(token) {
            thread.begin_fetch();
        }

        match self.api.conversation_messages(token.conversation_id.clone()).await {
            Ok(fetched) => {
                self.cache.merge(&token.conversation_id, fetched.clone());
                let mut state = self.lock();
                match state.thread_for(token) {
                    Some(thread) => {
                        let added = thread.finish_fetch(fetched);
                        state.scroll.on_new_messages(added);
                    }
                    None => debug!(
                        conversation_id = %token.conversation_id,
                        "Dropping history for a deselected conversation"
                    ),
                }
                Ok(())
            }
            Err(err) => {
                if let Some(thread) = self.lock().thread_for(token) {
                    thread.fail_fetch(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Re-fetch the open thread unless the user scrolled recently.
    ///
    /// Returns whether a fetch ran.
    ///
    /// # Errors
    /// Returns an error if the fetch fails.
    pub async fn background_refresh(&self) -> SyncResult<bool> {
        let token = {
            let state = self.lock();
            let Some(token) = state.current.clone() else {
                return Ok(false);
            };
            if state.scroll.is_paused() {
                debug!("Background refresh paused by scrolling");
                return Ok(false);
            }
            token
        };
        self.load(&token).await?;
        Ok(true)
    }

    /// Send text optimistically.
    ///
    /// # Errors
    /// Returns a validation error for blank text or when nothing is selected.
    /// Transport failures are reported as [`SendOutcome::Failed`].
    pub async fn send_text(&self, content: &str) -> SyncResult<SendOutcome> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::Validation("message is empty".to_string()));
        }
        let outgoing = OutgoingMessage::Text(content.to_string());
        let (token, local_id) = self.stage(&outgoing)?;
        self.typing_sent().await;
        Ok(self.deliver(token, local_id, outgoing).await)
    }

    /// The agent edited the input box; publishes their typing state, debounced.
    ///
    /// # Errors
    /// Returns an error if the typing request fails.
    pub async fn on_input(&self, text: &str) -> SyncResult<()> {
        let publisher = self.lock().typing_out.clone();
        match publisher {
            Some(publisher) => publisher.on_input(text).await,
            None => Ok(()),
        }
    }

    /// Upload a file optimistically, with an optional caption.
    ///
    /// # Errors
    /// Returns a validation error for an empty file or when nothing is selected.
    pub async fn send_file(
        &self,
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
        caption: Option<String>,
    ) -> SyncResult<SendOutcome> {
        if bytes.is_empty() {
            return Err(SyncError::Validation("file is empty".to_string()));
        }
        let outgoing = OutgoingMessage::File {
            name: name.into(),
            mime: mime.into(),
            bytes,
            caption: caption
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        };
        let (token, local_id) = self.stage(&outgoing)?;
        self.typing_sent().await;
        Ok(self.deliver(token, local_id, outgoing).await)
    }

    async fn typing_sent(&self) {
        let publisher = self.lock().typing_out.clone();
        stop_typing(publisher).await;
    }

    /// Drop a failed placeholder and hand its text back to the input box.
    #[must_use]
    pub fn retry(&self, local_id: &MessageId) -> Option<String> {
        let mut state = self.lock();
        let token = state.current.clone()?;
        let thread = state.thread_for(&token)?;
        if !thread.messages().iter().any(|m| &m.id == local_id && m.failed) {
            return None;
        }
        let removed = thread.remove(local_id)?;
        state.failed_sends.remove(local_id);
        Some(removed.content)
    }

    /// Drop a failed placeholder and send its content again.
    ///
    /// # Errors
    /// Returns `NotFound` if no failed placeholder has this id.
    pub async fn resend(&self, local_id: &MessageId) -> SyncResult<SendOutcome> {
        let outgoing = {
            let mut state = self.lock();
            let token = state
                .current
                .clone()
                .ok_or_else(|| SyncError::Validation("no conversation selected".to_string()))?;
            let removed = state
                .thread_for(&token)
                .filter(|t| t.messages().iter().any(|m| &m.id == local_id && m.failed))
                .and_then(|t| t.remove(local_id))
                .ok_or_else(|| SyncError::NotFound(format!("failed message {local_id}")))?;
            state
                .failed_sends
                .remove(local_id)
                .unwrap_or(OutgoingMessage::Text(removed.content))
        };
        let (token, new_id) = self.stage(&outgoing)?;
        self.typing_sent().await;
        Ok(self.deliver(token, new_id, outgoing).await)
    }

    /// Fold a pushed message in. `None` when the push is stale or foreign.
    pub fn on_push(&self, token: &SelectionToken, message: Message) -> Option<Applied> {
        if !message.belongs_to(&token.conversation_id) {
            debug!(conversation_id = %token.conversation_id, "Ignoring push for another conversation");
            return None;
        }
        self.cache.apply(&token.conversation_id, message.clone());

        let mut state = self.lock();
        let applied = state.thread_for(token)?.apply(message)?;
        if applied != Applied::Replaced {
            state.scroll.on_new_content();
        }
        Some(applied)
    }

    /// Record a pushed typing indicator.
    pub fn on_typing(&self, token: &SelectionToken, event: TypingEvent) {
        if self.is_current(token) {
            self.typing.on_event(&token.conversation_id, event);
        }
    }

    /// Who is typing in the open conversation.
    #[must_use]
    pub fn typing_indicator(&self) -> Option<SenderType> {
        let conversation_id = self.conversation_id()?;
        self.typing.typing(&conversation_id)
    }

    /// The user scrolled the thread.
    pub fn on_scroll(&self, at_bottom: bool) {
        self.lock().scroll.on_scroll(at_bottom);
    }

    /// Whether background refresh is paused by recent scrolling.
    #[must_use]
    pub fn is_refresh_paused(&self) -> bool {
        self.lock().scroll.is_paused()
    }

    /// Messages that arrived while scrolled up.
    #[must_use]
    pub fn unseen(&self) -> usize {
        self.lock().scroll.unseen()
    }

    /// Whether the viewport was last reported at the bottom.
    #[must_use]
    pub fn at_bottom(&self) -> bool {
        self.lock().scroll.at_bottom()
    }

    /// Whether new content landed while at the bottom since the last call.
    ///
    /// The view polls this after rendering and scrolls down when it is `true`.
    #[must_use]
    pub fn take_scroll_request(&self) -> bool {
        self.lock().scroll.take_scroll_request()
    }

    /// Deselect: leave the channel and mark the thread closed.
    pub async fn close(&self) {
        let (subscription, typing_out) = {
            let mut state = self.lock();
            state.epoch += 1;
            state.current = None;
            state.failed_sends.clear();
            if let Some(thread) = state.thread.as_mut() {
                thread.set_status(ThreadStatus::Closed);
            }
            (state.subscription.take(), state.typing_out.take())
        };
        stop_typing(typing_out).await;
        if let Some((conversation_id, handle)) = subscription {
            self.realtime.unsubscribe(&conversation_id, handle).await;
            self.typing.clear(&conversation_id);
        }
    }

    /// Close and forget the thread. Used on logout.
    pub async fn reset(&self) {
        self.close().await;
        let mut state = self.lock();
        state.thread = None;
        state.scroll.reset();
        self.typing.clear_all();
    }

    /// Whether `token` is the current selection.
    #[must_use]
    pub fn is_current(&self, token: &SelectionToken) -> bool {
        self.lock().current.as_ref() == Some(token)
    }

    /// Currently selected conversation.
    #[must_use]
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.lock()
            .current
            .as_ref()
            .map(|token| token.conversation_id.clone())
    }

    /// Copy of the thread state.
    #[must_use]
    pub fn snapshot(&self) -> Option<ThreadState> {
        self.lock().thread.clone()
    }

    /// Messages of the thread in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock()
            .thread
            .as_ref()
            .map(|t| t.messages().to_vec())
            .unwrap_or_default()
    }

    /// Thread messages grouped by calendar date in `tz`.
    #[must_use]
    pub fn grouped<Tz: TimeZone>(&self, tz: &Tz) -> Vec<DateGroup> {
        group_by_date(&self.messages(), tz)
    }

    /// Append a placeholder for `outgoing` to the current thread.
    fn stage(&self, outgoing: &OutgoingMessage) -> SyncResult<(SelectionToken, MessageId)> {
        let mut state = self.lock();
        let token = state
            .current
            .clone()
            .ok_or_else(|| SyncError::Validation("no conversation selected".to_string()))?;
        let thread = state
            .thread_for(&token)
            .ok_or_else(|| SyncError::Validation("no conversation selected".to_string()))?;

        let now = Utc::now();
        let local_id = thread.next_temp_id(now);
        let mut placeholder =
            Message::optimistic(local_id.clone(), token.conversation_id.clone(), "", now);
        match outgoing {
            OutgoingMessage::Text(text) => placeholder.content.clone_from(text),
            OutgoingMessage::File {
                name,
                mime,
                bytes,
                caption,
            } => {
                placeholder.kind = MessageKind::for_mime(mime);
                placeholder.content.clone_from(caption.as_ref().unwrap_or(name));
                placeholder.file_name = Some(name.clone());
                placeholder.file_size = Some(bytes.len() as u64);
            }
        }
        thread.apply(placeholder);
        state.scroll.on_new_content();
        Ok((token, local_id))
    }

    async fn deliver(
        &self,
        token: SelectionToken,
        local_id: MessageId,
        outgoing: OutgoingMessage,
    ) -> SendOutcome {
        let conversation_id = token.conversation_id.clone();
        match self.api.send_message(conversation_id.clone(), outgoing.clone()).await {
            Ok(Some(mut confirmed)) => {
                confirmed
                    .conversation_id
                    .get_or_insert_with(|| conversation_id.clone());
                self.cache.apply(&conversation_id, confirmed.clone());
                let message_id = confirmed.id.clone();
                if let Some(thread) = self.lock().thread_for(&token) {
                    thread.remove(&local_id);
                    thread.apply(confirmed);
                }
                SendOutcome::Confirmed {
                    local_id,
                    message_id,
                }
            }
            Ok(None) => SendOutcome::AwaitingEcho { local_id },
            Err(error) => {
                warn!(%conversation_id, %local_id, "Send failed: {error}");
                let mut state = self.lock();
                let marked = state
                    .thread_for(&token)
                    .is_some_and(|thread| thread.mark_failed(&local_id));
                if marked {
                    state.failed_sends.insert(local_id.clone(), outgoing);
                }
                SendOutcome::Failed { local_id, error }
            }
        }
    }
}

async fn stop_typing(publisher: Option<Arc<TypingPublisher>>) {
    if let Some(publisher) = publisher {
        if let Err(err) = publisher.stop().await {
            debug!("Typing stop not published: {err}");
        }
    }
}

impl RefreshJob for ChatSession {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn is_paused(&self) -> bool {
        self.is_refresh_paused()
    }

    fn refresh(&self) -> ApiFuture<'_, SyncResult<bool>> {
        Box::pin(self.background_refresh())
    }
}

/// Routes channel events to the session under the token they were registered with.
struct ThreadListener {
    session: Weak<ChatSession>,
    token: SelectionToken,
}

impl ConversationListener for ThreadListener {
    fn on_new_message(&self, message: Message) {
        if let Some(session) = self.session.upgrade() {
            session.on_push(&self.token, message);
        }
    }

    fn on_typing(&self, event: TypingEvent) {
        if let Some(session) = self.session.upgrade() {
            session.on_typing(&self.token, event);
        }
    }

    fn on_error(&self, error: &SyncError) {
        debug!(conversation_id = %self.token.conversation_id, "Thread channel error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CacheConfig;
    use crate::realtime::LocalPushHub;
    use crate::testing::{ApiCall, ScriptedApi, SendReply};
    use chrono::DateTime;
    use serde_json::json;

    const WINDOW: Duration = Duration::from_secs(60);

    struct Fixture {
        api: Arc<ScriptedApi>,
        hub: Arc<LocalPushHub>,
        cache: Arc<MessageCache>,
        session: Arc<ChatSession>,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(ScriptedApi::default());
        let hub = Arc::new(LocalPushHub::new());
        let cache = Arc::new(
            MessageCache::new(CacheConfig::default(), WINDOW).unwrap_or_else(|e| panic!("{e}")),
        );
        let realtime = Arc::new(RealtimeClient::new(
            Arc::clone(&hub) as Arc<dyn crate::realtime::PushProvider>,
            Arc::clone(&api) as Arc<dyn ApiClient>,
            "conversations",
        ));
        let session = ChatSession::new(
            Arc::clone(&api) as Arc<dyn ApiClient>,
            Arc::clone(&cache),
            realtime,
            WINDOW,
            Duration::from_secs(3),
            Duration::from_secs(3),
            Duration::from_secs(8),
        );
        Fixture {
            api,
            hub,
            cache,
            session,
        }
    }

    fn server(conv: u64, id: u64, content: &str, at: DateTime<Utc>) -> Message {
        let mut m = Message::optimistic(MessageId::from(id), ConversationId::from(conv), content, at);
        m.temp = false;
        m
    }

    fn visitor(conv: u64, id: u64, content: &str) -> Message {
        let mut m = server(conv, id, content, Utc::now());
        m.sender_type = SenderType::Visitor;
        m
    }

    fn ids(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_loads_history_and_subscribes() {
        let f = fixture();
        let conv = ConversationId::from(1);
        f.api.set_messages(&conv, vec![visitor(1, 1, "hi"), visitor(1, 2, "anyone?")]);

        let token = f.session.open(&conv).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(token.conversation_id(), &conv);
        assert_eq!(ids(&f.session.messages()), vec!["1", "2"]);
        assert_eq!(
            f.session.snapshot().map(|t| t.status()),
            Some(ThreadStatus::Loaded)
        );
        assert!(f.hub.is_subscribed("conversation.1"));
        assert_eq!(f.cache.get(&conv).map(|m| m.len()), Some(2));
    }

    #[tokio::test]
    async fn test_cached_thread_shows_before_fetch() {
        let f = fixture();
        let conv = ConversationId::from(1);
        f.cache.merge(&conv, vec![visitor(1, 1, "cached")]);

        let token = f.session.select(&conv).await;
        let snapshot = f.session.snapshot().unwrap_or_else(|| panic!("thread"));
        assert_eq!(snapshot.status(), ThreadStatus::BackgroundRefreshing);
        assert_eq!(snapshot.messages().len(), 1);

        f.api.set_messages(&conv, vec![visitor(1, 2, "new")]);
        assert!(f.session.load(&token).await.is_ok());
        // Merge, not overwrite.
        assert_eq!(ids(&f.session.messages()), vec!["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_history_never_lands_in_active_thread() {
        let f = fixture();
        let (a, b) = (ConversationId::from(1), ConversationId::from(2));
        f.api.set_messages(&a, vec![visitor(1, 10, "from A")]);
        f.api.set_messages(&b, vec![visitor(2, 20, "from B")]);
        f.api.delay_messages(&a, Duration::from_millis(500));
        f.api.delay_messages(&b, Duration::from_millis(10));

        let token_a = f.session.select(&a).await;
        let slow = f.session.load(&token_a);
        let fast = async {
            let token_b = f.session.select(&b).await;
            f.session.load(&token_b).await
        };
        let (slow, fast) = tokio::join!(slow, fast);
        assert!(slow.is_ok() && fast.is_ok());

        assert_eq!(f.session.conversation_id(), Some(b));
        assert_eq!(ids(&f.session.messages()), vec!["20"]);
        // A's history is still valid data for A.
        assert_eq!(f.cache.get(&a).map(|m| ids(&m)), Some(vec!["10".to_string()]));
        assert!(!f.session.is_current(&token_a));
    }

    #[tokio::test]
    async fn test_send_confirmed_replaces_placeholder() {
        let f = fixture();
        let conv = ConversationId::from(1);
        let _ = f.session.open(&conv).await;
        f.api.push_send_reply(SendReply::Echo(server(1, 55, "hello", Utc::now())));

        let outcome = f.session.send_text("  hello ").await.unwrap_or_else(|e| panic!("{e}"));
        match &outcome {
            SendOutcome::Confirmed { message_id, .. } => assert_eq!(message_id.as_str(), "55"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ids(&f.session.messages()), vec!["55"]);
        assert!(matches!(
            f.api.calls().last(),
            Some(ApiCall::Send(_, OutgoingMessage::Text(t))) if t == "hello"
        ));

        // The push echo of the same message does not duplicate it.
        f.hub.publish(
            "conversation.1",
            "new-message",
            json!({"message": {"id": 55, "content": "hello", "sender_type": "agent", "created_at": Utc::now().to_rfc3339()}}),
        );
        assert_eq!(ids(&f.session.messages()), vec!["55"]);
    }

    #[tokio::test]
    async fn test_repeated_text_keeps_pending_placeholder_through_poll() {
        let f = fixture();
        let conv = ConversationId::from(1);
        let _ = f.session.open(&conv).await;
        f.api.push_send_reply(SendReply::Echo(server(1, 55, "ok", Utc::now())));

        let first = f.session.send_text("ok").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(first, SendOutcome::Confirmed { .. }));
        let second = f.session.send_text("ok").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(second, SendOutcome::AwaitingEcho { .. }));

        // The poll only returns the first "ok"; the second is still in flight.
        assert_eq!(f.session.background_refresh().await.ok(), Some(true));
        assert_eq!(
            ids(&f.session.messages()),
            vec!["55".to_string(), second.local_id().to_string()]
        );

        f.hub.publish(
            "conversation.1",
            "new-message",
            json!({"id": 56, "content": "ok", "sender_type": "agent", "created_at": Utc::now().to_rfc3339()}),
        );
        assert_eq!(ids(&f.session.messages()), vec!["55", "56"]);
    }

    #[tokio::test]
    async fn test_send_without_echo_waits_for_push() {
        let f = fixture();
        let conv = ConversationId::from(1);
        let _ = f.session.open(&conv).await;

        let outcome = f.session.send_text("hello").await.unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(outcome, SendOutcome::AwaitingEcho { .. }));
        assert!(outcome.local_id().is_temp());
        assert_eq!(f.session.messages().len(), 1);

        f.hub.publish(
            "conversation.1",
            "new-message",
            json!({"id": 55, "content": "hello", "sender_type": "agent", "created_at": Utc::now().to_rfc3339()}),
        );
        assert_eq!(ids(&f.session.messages()), vec!["55"]);
    }

    #[tokio::test]
    async fn test_send_clears_agent_typing_first() {
        let f = fixture();
        let _ = f.session.open(&ConversationId::from(1)).await;
        assert!(f.session.on_input("hel").await.is_ok());
        assert!(f.session.on_input("hello").await.is_ok());
        let _ = f.session.send_text("hello").await;

        let tail: Vec<_> = f
            .api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ApiCall::Typing(..) | ApiCall::Send(..)))
            .collect();
        assert!(matches!(
            tail.as_slice(),
            [ApiCall::Typing(_, true), ApiCall::Typing(_, false), ApiCall::Send(..)]
        ));

        // Nothing typed since: switching conversations sends no extra stop.
        let _ = f.session.open(&ConversationId::from(2)).await;
        let stops = f
            .api
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::Typing(_, false)))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn test_blank_send_rejected() {
        let f = fixture();
        let _ = f.session.open(&ConversationId::from(1)).await;
        assert!(matches!(f.session.send_text("   ").await, Err(SyncError::Validation(_))));
        assert!(f.session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_selection_rejected() {
        let f = fixture();
        assert!(matches!(f.session.send_text("hi").await, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failed_send_retry_and_resend() {
        let f = fixture();
        let _ = f.session.open(&ConversationId::from(1)).await;
        f.api.push_send_reply(SendReply::Fail(500));

        let outcome = f.session.send_text("ping").await.unwrap_or_else(|e| panic!("{e}"));
        let local_id = outcome.local_id().clone();
        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert!(f.session.messages().iter().any(|m| m.failed));

        // Resend replaces the failed entry rather than adding a second one.
        f.api.push_send_reply(SendReply::Echo(server(1, 7, "ping", Utc::now())));
        let resent = f.session.resend(&local_id).await.unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(resent, SendOutcome::Confirmed { .. }));
        assert_eq!(ids(&f.session.messages()), vec!["7"]);
        assert!(matches!(
            f.session.resend(&local_id).await,
            Err(SyncError::NotFound(_))
        ));

        f.api.push_send_reply(SendReply::Fail(503));
        let failed = f.session.send_text("again").await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(f.session.retry(failed.local_id()), Some("again".to_string()));
        assert_eq!(ids(&f.session.messages()), vec!["7"]);
        assert_eq!(f.session.retry(failed.local_id()), None);
    }

    #[tokio::test]
    async fn test_file_placeholder_kind() {
        let f = fixture();
        let _ = f.session.open(&ConversationId::from(1)).await;
        let outcome = f
            .session
            .send_file("shot.png", "image/png", vec![1, 2, 3], Some(" the error ".into()))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let placeholder = f
            .session
            .messages()
            .into_iter()
            .find(|m| &m.id == outcome.local_id())
            .unwrap_or_else(|| panic!("placeholder"));
        assert_eq!(placeholder.kind, MessageKind::Image);
        assert_eq!(placeholder.content, "the error");
        assert_eq!(placeholder.file_name.as_deref(), Some("shot.png"));
        assert_eq!(placeholder.file_size, Some(3));
        assert!(matches!(
            f.api.calls().last(),
            Some(ApiCall::Send(_, OutgoingMessage::File { caption: Some(c), .. })) if c == "the error"
        ));
    }

    #[tokio::test]
    async fn test_push_for_previous_selection_ignored() {
        let f = fixture();
        let a = ConversationId::from(1);
        let token_a = f.session.open(&a).await.unwrap_or_else(|e| panic!("{e}"));
        let _ = f.session.open(&ConversationId::from(2)).await;

        assert_eq!(f.session.on_push(&token_a, visitor(1, 3, "late")), None);
        assert!(f.session.messages().is_empty());
        // The old channel was released on reselection.
        assert!(!f.hub.is_subscribed("conversation.1"));
        assert_eq!(f.cache.get(&a).map(|m| m.len()), Some(1));
    }

    #[tokio::test]
    async fn test_typing_indicator_from_push() {
        let f = fixture();
        let _ = f.session.open(&ConversationId::from(1)).await;
        f.hub.publish(
            "conversation.1",
            "typing",
            json!({"sender_type": "visitor", "is_typing": true}),
        );
        assert_eq!(f.session.typing_indicator(), Some(SenderType::Visitor));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_pauses_on_scroll() {
        let f = fixture();
        let conv = ConversationId::from(1);
        let _ = f.session.open(&conv).await;

        f.session.on_scroll(false);
        assert_eq!(f.session.background_refresh().await.ok(), Some(false));

        tokio::time::advance(Duration::from_secs(9)).await;
        f.api.set_messages(&conv, vec![visitor(1, 4, "later")]);
        assert_eq!(f.session.background_refresh().await.ok(), Some(true));
        assert_eq!(ids(&f.session.messages()), vec!["4"]);
        // Still scrolled up: the polled message waits below the fold.
        assert_eq!(f.session.unseen(), 1);
        assert!(!f.session.at_bottom());
        assert!(!f.session.take_scroll_request());

        f.session.on_scroll(true);
        assert_eq!(f.session.unseen(), 0);
        tokio::time::advance(Duration::from_secs(9)).await;
        f.api.set_messages(&conv, vec![visitor(1, 4, "later"), visitor(1, 5, "again")]);
        assert_eq!(f.session.background_refresh().await.ok(), Some(true));
        assert!(f.session.take_scroll_request());
        assert_eq!(f.session.unseen(), 0);
    }

    #[tokio::test]
    async fn test_push_and_send_request_scroll_only_at_bottom() {
        let f = fixture();
        let conv = ConversationId::from(1);
        let token = f.session.open(&conv).await.unwrap_or_else(|e| panic!("{e}"));
        let _ = f.session.take_scroll_request();

        assert_eq!(f.session.on_push(&token, visitor(1, 1, "hi")), Some(Applied::Inserted));
        assert!(f.session.take_scroll_request());

        f.session.on_scroll(false);
        let _ = f.session.on_push(&token, visitor(1, 2, "still there?"));
        let _ = f.session.send_text("yes").await;
        assert_eq!(f.session.unseen(), 2);
        assert!(!f.session.take_scroll_request());
    }

    #[tokio::test]
    async fn test_load_error_is_kept() {
        let f = fixture();
        let conv = ConversationId::from(1);
        f.api.fail_thread(&conv, true);
        assert!(f.session.open(&conv).await.is_err());
        let snapshot = f.session.snapshot().unwrap_or_else(|| panic!("thread"));
        assert!(snapshot.last_error().is_some());

        f.api.fail_thread(&conv, false);
        let token = f.session.select(&conv).await;
        assert!(f.session.load(&token).await.is_ok());
        assert!(f.session.snapshot().and_then(|t| t.last_error().map(str::to_string)).is_none());
    }

    #[tokio::test]
    async fn test_close_and_reset() {
        let f = fixture();
        let _ = f.session.open(&ConversationId::from(1)).await;
        f.session.close().await;
        assert_eq!(
            f.session.snapshot().map(|t| t.status()),
            Some(ThreadStatus::Closed)
        );
        assert!(f.session.conversation_id().is_none());
        assert_eq!(f.hub.channel_count(), 0);

        f.session.reset().await;
        assert!(f.session.snapshot().is_none());
    }
}
