//! Application wiring and lifecycle.
//!
//! [`HelpdeskApp`] owns one of everything: the auth session, the API client,
//! the realtime client, the inbox store, the process-wide message cache and
//! the chat session. Logging out, explicitly or through any 401, clears the
//! cache, resets the inbox and the chat, and drops every subscription.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::account::TokenValidator;
use crate::api::{ApiClient, AuthSession, HttpApiClient};
use crate::chat::{ChatSession, MessageCache, SelectionToken};
use crate::core::config::SyncConfig;
use crate::core::errors::SyncResult;
use crate::core::ids::ConversationId;
use crate::inbox::ConversationStore;
use crate::model::{ConversationState, Message};
use crate::realtime::{
    ConversationListener, InboxListener, PushProvider, RealtimeClient, SubscriptionHandle,
};
use crate::refresh::{RefreshConfigBuilder, RefreshHandle, RefreshWorker};

#[derive(Default)]
struct Lifecycle {
    workers: Vec<RefreshHandle>,
    watcher: Option<JoinHandle<()>>,
    inbox_subscription: Option<SubscriptionHandle>,
    thread_feed: Option<(ConversationId, SubscriptionHandle)>,
}

/// The sync layer, assembled.
pub struct HelpdeskApp {
    config: SyncConfig,
    session: Arc<AuthSession>,
    http: Option<Arc<HttpApiClient>>,
    validator: Arc<TokenValidator>,
    realtime: Arc<RealtimeClient>,
    inbox: Arc<ConversationStore>,
    cache: Arc<MessageCache>,
    chat: Arc<ChatSession>,
    lifecycle: Mutex<Lifecycle>,
}

impl HelpdeskApp {
    /// Build the app over HTTP with `provider` for push.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SyncConfig, provider: Arc<dyn PushProvider>) -> SyncResult<Arc<Self>> {
        config.validate()?;
        let session = Arc::new(AuthSession::new(config.api.token.clone()));
        let http = Arc::new(HttpApiClient::new(config.api.clone(), Arc::clone(&session))?);
        let api: Arc<dyn ApiClient> = http.clone();
        Self::assemble(config, session, api, Some(http), provider)
    }

    /// Build the app over any [`ApiClient`].
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn with_api(
        config: SyncConfig,
        session: Arc<AuthSession>,
        api: Arc<dyn ApiClient>,
        provider: Arc<dyn PushProvider>,
    ) -> SyncResult<Arc<Self>> {
        config.validate()?;
        Self::assemble(config, session, api, None, provider)
    }

    fn assemble(
        config: SyncConfig,
        session: Arc<AuthSession>,
        api: Arc<dyn ApiClient>,
        http: Option<Arc<HttpApiClient>>,
        provider: Arc<dyn PushProvider>,
    ) -> SyncResult<Arc<Self>> {
        let cache = Arc::new(MessageCache::new(
            config.cache.clone(),
            config.reconcile.echo_window,
        )?);
        let realtime = Arc::new(RealtimeClient::new(
            provider,
            Arc::clone(&api),
            config.realtime.global_channel.clone(),
        ));
        let inbox = Arc::new(ConversationStore::new(Arc::clone(&api), config.api.page_size));
        let validator = Arc::new(TokenValidator::new(Arc::clone(&api), Arc::clone(&session)));
        let chat = ChatSession::new(
            api,
            Arc::clone(&cache),
            Arc::clone(&realtime),
            config.reconcile.echo_window,
            config.realtime.typing_ttl,
            config.realtime.typing_idle,
            config.polling.scroll_pause,
        );

        Ok(Arc::new(Self {
            config,
            session,
            http,
            validator,
            realtime,
            inbox,
            cache,
            chat,
            lifecycle: Mutex::new(Lifecycle::default()),
        }))
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe the inbox, load the first page, start polling, re-validate
    /// the token periodically and watch the session.
    ///
    /// # Errors
    /// Returns an error if the first inbox page cannot be loaded.
    pub async fn start(self: &Arc<Self>) -> SyncResult<()> {
        info!("Starting helpdesk sync");
        self.subscribe_inbox().await;

        let inbox_worker = RefreshWorker::new(
            Arc::clone(&self.inbox),
            RefreshConfigBuilder::new()
                .interval(self.config.polling.list_interval)
                .build(),
        )
        .spawn();
        let thread_worker = RefreshWorker::new(
            Arc::clone(&self.chat),
            RefreshConfigBuilder::new()
                .interval(self.config.polling.thread_interval)
                .build(),
        )
        .spawn();
        let token_worker = RefreshWorker::new(
            Arc::clone(&self.validator),
            RefreshConfigBuilder::new()
                .interval(self.config.polling.token_check_interval)
                .build(),
        )
        .spawn();
        let watcher = self.spawn_session_watcher();
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.workers.extend([inbox_worker, thread_worker, token_worker]);
            lifecycle.watcher = Some(watcher);
        }

        self.inbox.refresh().await?;
        Ok(())
    }

    /// Open a conversation: mark it read, load its thread, follow its channel.
    ///
    /// # Errors
    /// Returns an error if the history fetch fails; the thread stays selected.
    pub async fn open_conversation(&self, id: &ConversationId) -> SyncResult<SelectionToken> {
        self.inbox.set_open_conversation(Some(id.clone()));
        self.follow_in_inbox(Some(id)).await;
        self.chat.open(id).await
    }

    /// Deselect the open conversation.
    pub async fn close_conversation(&self) {
        self.chat.close().await;
        self.inbox.set_open_conversation(None);
        self.follow_in_inbox(None).await;
    }

    /// Move a conversation to another state.
    ///
    /// # Errors
    /// Returns the backend error when the transition fails.
    pub async fn update_state(&self, id: &ConversationId, state: ConversationState) -> SyncResult<()> {
        self.inbox.update_state(id, state).await
    }

    /// Log out locally; the session watcher clears everything.
    pub fn logout(&self) -> bool {
        self.session.logout()
    }

    /// Drop the cache, the inbox, the thread and all subscriptions.
    pub async fn clear_local_state(&self) {
        self.cache.clear();
        self.inbox.reset();
        self.chat.reset().await;
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.inbox_subscription = None;
            lifecycle.thread_feed = None;
        }
        self.realtime.unsubscribe_all().await;
        info!("Local state cleared");
    }

    /// Stop workers and release every subscription.
    pub async fn shutdown(&self) {
        let (workers, watcher) = {
            let mut lifecycle = self.lifecycle();
            (std::mem::take(&mut lifecycle.workers), lifecycle.watcher.take())
        };
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        let stopped = join_all(workers.into_iter().map(RefreshHandle::stop)).await;
        for stats in stopped {
            debug!(?stats, "Refresh worker stopped");
        }
        self.realtime.unsubscribe_all().await;
        info!("Helpdesk sync stopped");
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Auth session.
    #[must_use]
    pub const fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// HTTP client, for the account surfaces; `None` when built over another client.
    #[must_use]
    pub fn http(&self) -> Option<&HttpApiClient> {
        self.http.as_deref()
    }

    /// Inbox store.
    #[must_use]
    pub const fn inbox(&self) -> &Arc<ConversationStore> {
        &self.inbox
    }

    /// Chat session.
    #[must_use]
    pub const fn chat(&self) -> &Arc<ChatSession> {
        &self.chat
    }

    /// Process-wide message cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    /// Realtime client.
    #[must_use]
    pub const fn realtime(&self) -> &Arc<RealtimeClient> {
        &self.realtime
    }

    async fn subscribe_inbox(&self) {
        if self.lifecycle().inbox_subscription.is_some() {
            return;
        }
        match self
            .realtime
            .subscribe_new_conversations(Arc::clone(&self.inbox) as Arc<dyn InboxListener>)
            .await
        {
            Ok(handle) => self.lifecycle().inbox_subscription = Some(handle),
            Err(err) => warn!("New-conversation channel unavailable: {err}"),
        }
    }

    /// Route pushed messages of `id` into the inbox previews.
    async fn follow_in_inbox(&self, id: Option<&ConversationId>) {
        let previous = self.lifecycle().thread_feed.take();
        if let Some((old, handle)) = previous {
            self.realtime.unsubscribe(&old, handle).await;
        }
        let Some(id) = id else {
            return;
        };

        let feed = Arc::new(InboxFeed {
            inbox: Arc::downgrade(&self.inbox),
            conversation_id: id.clone(),
        });
        match self.realtime.subscribe(id, feed).await {
            Ok(handle) => self.lifecycle().thread_feed = Some((id.clone(), handle)),
            Err(err) => debug!(conversation_id = %id, "Inbox feed not subscribed: {err}"),
        }
    }

    fn spawn_session_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let app = Arc::downgrade(self);
        let mut rx = self.session.subscribe();
        let mut authenticated = rx.borrow_and_update().is_some();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let now = rx.borrow_and_update().is_some();
                if now == authenticated {
                    continue;
                }
                authenticated = now;
                let Some(app) = Weak::upgrade(&app) else {
                    break;
                };
                if now {
                    info!("Session authenticated, resubscribing");
                    app.subscribe_inbox().await;
                    if let Err(err) = app.inbox.refresh().await {
                        warn!("Inbox refresh after login failed: {err}");
                    }
                } else {
                    info!("Session ended, clearing local state");
                    app.clear_local_state().await;
                }
            }
        })
    }
}

/// Patches inbox previews from a conversation channel.
struct InboxFeed {
    inbox: Weak<ConversationStore>,
    conversation_id: ConversationId,
}

impl ConversationListener for InboxFeed {
    fn on_new_message(&self, message: Message) {
        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        if !inbox.apply_incremental_message(&self.conversation_id, &message) {
            debug!(conversation_id = %self.conversation_id, "Conversation not listed, refreshing inbox");
            tokio::spawn(async move {
                if let Err(err) = inbox.refresh().await {
                    warn!("Inbox refresh failed: {err}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::MessageId;
    use crate::realtime::LocalPushHub;
    use crate::testing::{ApiCall, ScriptedApi, conversation};
    use std::time::Duration;
    use chrono::Utc;
    use serde_json::json;

    struct Fixture {
        api: Arc<ScriptedApi>,
        hub: Arc<LocalPushHub>,
        app: Arc<HelpdeskApp>,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(ScriptedApi::default());
        api.set_conversations(vec![
            conversation(1, "ana", ConversationState::Active),
            conversation(2, "bo", ConversationState::Pending),
        ]);
        let hub = Arc::new(LocalPushHub::new());
        let app = HelpdeskApp::with_api(
            SyncConfig::default(),
            Arc::new(AuthSession::new(Some("t0ken".into()))),
            Arc::clone(&api) as Arc<dyn ApiClient>,
            Arc::clone(&hub) as Arc<dyn PushProvider>,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        Fixture { api, hub, app }
    }

    fn visitor(conv: u64, id: u64, content: &str) -> Message {
        let mut m = Message::optimistic(MessageId::from(id), ConversationId::from(conv), content, Utc::now());
        m.temp = false;
        m.sender_type = crate::model::SenderType::Visitor;
        m
    }

    #[tokio::test]
    async fn test_start_loads_inbox_and_listens_for_conversations() {
        let f = fixture();
        assert!(f.app.start().await.is_ok());
        assert_eq!(f.app.inbox().items().len(), 2);
        assert!(f.hub.is_subscribed("conversations"));

        f.hub.publish("conversations", "new-conversation", json!({"id": 3, "name": "cy"}));
        assert_eq!(f.app.inbox().items().first().map(|c| c.id.to_string()), Some("3".into()));
        f.app.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_reaches_thread_and_inbox_once_subscribed() {
        let f = fixture();
        let _ = f.app.start().await;
        let _ = f.app.open_conversation(&ConversationId::from(1)).await;
        assert_eq!(f.app.realtime().listener_count("conversation.1"), 2);
        assert_eq!(f.hub.channel_count(), 2);

        f.hub.publish(
            "conversation.1",
            "new-message",
            json!({"message": {"id": 10, "content": "hello?", "sender_type": "visitor", "created_at": Utc::now().to_rfc3339()}}),
        );
        assert_eq!(f.app.chat().messages().len(), 1);
        let row = f.app.inbox().get(&ConversationId::from(1)).unwrap_or_else(|| panic!("listed"));
        assert_eq!(row.last_message.as_deref(), Some("hello?"));
        // The conversation is open, so it stays read.
        assert!(row.is_read);

        f.app.close_conversation().await;
        assert!(!f.hub.is_subscribed("conversation.1"));
        f.app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_check_logs_out_and_clears() {
        let f = fixture();
        let _ = f.app.start().await;
        let _ = f.app.open_conversation(&ConversationId::from(1)).await;
        assert!(f.hub.channel_count() > 0);

        f.api.reject_token(true);
        tokio::time::sleep(f.app.config().polling.token_check_interval + Duration::from_secs(1)).await;

        assert!(!f.app.session().is_authenticated());
        assert!(f.api.calls().contains(&ApiCall::ValidateToken));
        assert!(f.app.chat().snapshot().is_none());
        assert_eq!(f.hub.channel_count(), 0);
        f.app.shutdown().await;
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let f = fixture();
        let _ = f.app.start().await;
        f.api.set_messages(&ConversationId::from(1), vec![visitor(1, 1, "hi")]);
        let _ = f.app.open_conversation(&ConversationId::from(1)).await;
        assert!(!f.app.cache().is_empty());

        assert!(f.app.logout());
        // Let the session watcher run.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if f.app.cache().is_empty() && f.hub.channel_count() == 0 {
                break;
            }
        }
        assert!(f.app.cache().is_empty());
        assert!(f.app.inbox().items().is_empty());
        assert!(f.app.chat().snapshot().is_none());
        assert_eq!(f.hub.channel_count(), 0);
        f.app.shutdown().await;
    }
}
