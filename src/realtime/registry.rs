//! Reference-counted channel registry.
//!
//! Keeps one provider subscription per channel and fans its events out to
//! every registered listener. The last listener to leave tears the provider
//! subscription down. While the provider subscribe is still in flight the
//! channel is pending: listeners may join or leave, but only the subscribing
//! call decides whether to keep or release it once the provider answers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::ids::ConversationId;
use crate::model::{Conversation, Message};
use crate::realtime::events::{ChannelEvent, TypingEvent, normalize};
use crate::realtime::provider::{ProviderEvent, PushProvider, PushSink};

/// Callbacks for a conversation channel. All methods default to no-ops.
pub trait ConversationListener: Send + Sync {
    /// A message was pushed.
    fn on_new_message(&self, message: Message) {
        let _ = message;
    }

    /// The other side started or stopped typing.
    fn on_typing(&self, event: TypingEvent) {
        let _ = event;
    }

    /// The channel failed. Never fatal; polling keeps the view fresh.
    fn on_error(&self, error: &SyncError) {
        let _ = error;
    }

    /// The provider confirmed the channel.
    fn on_subscribed(&self) {}
}

/// Callbacks for the global channel.
pub trait InboxListener: Send + Sync {
    /// A conversation was created.
    fn on_new_conversation(&self, conversation: Conversation);

    /// The channel failed.
    fn on_error(&self, error: &SyncError) {
        let _ = error;
    }
}

/// Identifies one listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Clone)]
enum Listener {
    Conversation(Arc<dyn ConversationListener>),
    Inbox(Arc<dyn InboxListener>),
}

impl Listener {
    fn subscribed(&self) {
        if let Self::Conversation(listener) = self {
            listener.on_subscribed();
        }
    }

    fn error(&self, error: &SyncError) {
        match self {
            Self::Conversation(listener) => listener.on_error(error),
            Self::Inbox(listener) => listener.on_error(error),
        }
    }

    fn deliver(&self, event: &ChannelEvent) {
        match (self, event) {
            (Self::Conversation(l), ChannelEvent::NewMessage(m)) => l.on_new_message(m.clone()),
            (Self::Conversation(l), ChannelEvent::Typing(t)) => l.on_typing(*t),
            (Self::Inbox(l), ChannelEvent::NewConversation(c)) => l.on_new_conversation(c.clone()),
            _ => {}
        }
    }
}

struct ChannelEntry {
    conversation_id: Option<ConversationId>,
    listeners: Vec<(SubscriptionHandle, Listener)>,
    confirmed: bool,
    pending: bool,
}

type Channels = Arc<DashMap<String, ChannelEntry>>;

/// Realtime channel client shared by the inbox and the chat session.
pub struct RealtimeClient {
    provider: Arc<dyn PushProvider>,
    api: Arc<dyn ApiClient>,
    global_channel: String,
    channels: Channels,
    next_handle: AtomicU64,
}

impl RealtimeClient {
    /// Create a client over `provider`; typing is published through `api`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn PushProvider>,
        api: Arc<dyn ApiClient>,
        global_channel: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            api,
            global_channel: global_channel.into(),
            channels: Arc::new(DashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Listen to `conversation.{id}`.
    ///
    /// # Errors
    /// Returns an error if the provider refuses the subscription; listeners
    /// registered on the channel get `on_error` first.
    pub async fn subscribe(
        &self,
        conversation_id: &ConversationId,
        listener: Arc<dyn ConversationListener>,
    ) -> SyncResult<SubscriptionHandle> {
        self.attach(
            conversation_id.channel_name(),
            Some(conversation_id.clone()),
            Listener::Conversation(listener),
        )
        .await
    }

    /// Remove a conversation listener. Unknown handles are ignored.
    pub async fn unsubscribe(&self, conversation_id: &ConversationId, handle: SubscriptionHandle) {
        self.detach(conversation_id.channel_name(), handle).await;
    }

    /// Listen for `new-conversation` on the global channel.
    ///
    /// # Errors
    /// Returns an error if the provider refuses the subscription.
    pub async fn subscribe_new_conversations(
        &self,
        listener: Arc<dyn InboxListener>,
    ) -> SyncResult<SubscriptionHandle> {
        self.attach(self.global_channel.clone(), None, Listener::Inbox(listener))
            .await
    }

    /// Remove a global-channel listener.
    pub async fn unsubscribe_new_conversations(&self, handle: SubscriptionHandle) {
        self.detach(self.global_channel.clone(), handle).await;
    }

    /// Tell the visitor side whether the agent is typing.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn publish_typing(&self, conversation_id: &ConversationId, is_typing: bool) -> SyncResult<()> {
        self.api.send_typing(conversation_id.clone(), is_typing).await
    }

    /// Listeners currently registered on `channel`.
    #[must_use]
    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |e| e.listeners.len())
    }

    /// Whether the provider confirmed `channel`.
    #[must_use]
    pub fn is_confirmed(&self, channel: &str) -> bool {
        self.channels.get(channel).is_some_and(|e| e.confirmed)
    }

    /// Drop every registration and provider subscription. Used on logout.
    pub async fn unsubscribe_all(&self) {
        let channels: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for channel in channels {
            if self.channels.remove_if(&channel, |_, entry| !entry.pending).is_some() {
                self.release(channel).await;
            } else if let Some(mut entry) = self.channels.get_mut(&channel) {
                entry.listeners.clear();
            }
        }
    }

    async fn attach(
        &self,
        channel: String,
        conversation_id: Option<ConversationId>,
        listener: Listener,
    ) -> SyncResult<SubscriptionHandle> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        let (first, confirmed) = match self.channels.entry(channel.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.listeners.push((handle, listener.clone()));
                (false, entry.confirmed)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ChannelEntry {
                    conversation_id,
                    listeners: vec![(handle, listener.clone())],
                    confirmed: false,
                    pending: true,
                });
                (true, false)
            }
        };

        if !first {
            debug!(%channel, "Joined existing push channel");
            if confirmed {
                listener.subscribed();
            }
            return Ok(handle);
        }

        let sink = sink_for(Arc::clone(&self.channels), channel.clone());
        if let Err(err) = self.provider.subscribe(channel.clone(), sink).await {
            warn!(%channel, "Push subscription failed: {err}");
            let listeners = self
                .channels
                .remove(&channel)
                .map(|(_, entry)| entry.listeners)
                .unwrap_or_default();
            for (_, listener) in listeners {
                listener.error(&err);
            }
            return Err(err);
        }

        let abandoned = match self.channels.get_mut(&channel) {
            Some(mut entry) => {
                entry.pending = false;
                entry.listeners.is_empty()
            }
            None => false,
        };
        if abandoned
            && self
                .channels
                .remove_if(&channel, |_, entry| entry.listeners.is_empty())
                .is_some()
        {
            debug!(%channel, "Every listener left while the subscription was in flight");
            self.release(channel).await;
        } else {
            info!(%channel, "Subscribed to push channel");
        }
        Ok(handle)
    }

    async fn detach(&self, channel: String, handle: SubscriptionHandle) {
        let now_empty = {
            let Some(mut entry) = self.channels.get_mut(&channel) else {
                debug!(%channel, "Unsubscribe from unknown channel ignored");
                return;
            };
            entry.listeners.retain(|(h, _)| *h != handle);
            entry.listeners.is_empty()
        };

        if now_empty
            && self
                .channels
                .remove_if(&channel, |_, entry| entry.listeners.is_empty() && !entry.pending)
                .is_some()
        {
            self.release(channel).await;
        }
    }

    async fn release(&self, channel: String) {
        debug!(%channel, "Releasing push channel");
        if let Err(err) = self.provider.unsubscribe(channel.clone()).await {
            warn!(%channel, "Push unsubscribe failed: {err}");
        }
    }
}

fn sink_for(channels: Channels, channel: String) -> PushSink {
    Arc::new(move |event| dispatch(&channels, &channel, event))
}

fn dispatch(channels: &DashMap<String, ChannelEntry>, channel: &str, event: ProviderEvent) {
    let (conversation_id, listeners) = {
        let Some(mut entry) = channels.get_mut(channel) else {
            debug!(channel, "Push event for released channel dropped");
            return;
        };
        if event == ProviderEvent::Subscribed {
            entry.confirmed = true;
        }
        let listeners: Vec<Listener> = entry.listeners.iter().map(|(_, l)| l.clone()).collect();
        (entry.conversation_id.clone(), listeners)
    };

    match event {
        ProviderEvent::Subscribed => {
            for listener in &listeners {
                listener.subscribed();
            }
        }
        ProviderEvent::Error(reason) => {
            warn!(channel, %reason, "Push channel error");
            let err = SyncError::Realtime(reason);
            for listener in &listeners {
                listener.error(&err);
            }
        }
        ProviderEvent::Event { name, payload } => {
            match normalize(conversation_id.as_ref(), &name, payload) {
                Ok(Some(event)) => {
                    for listener in &listeners {
                        listener.deliver(&event);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(channel, event = %name, "Malformed push payload: {err}"),
            }
        }
    }
}

/// What a [`ForwardingListener`] passes on.
#[derive(Clone, Debug, PartialEq)]
pub enum PushUpdate {
    /// A pushed message.
    Message(Message),
    /// A typing indicator.
    Typing(TypingEvent),
    /// A new conversation.
    Conversation(Conversation),
    /// A channel error, rendered.
    Error(String),
}

/// Listener that forwards everything into an mpsc channel.
pub struct ForwardingListener {
    tx: mpsc::UnboundedSender<PushUpdate>,
}

impl ForwardingListener {
    /// Create a listener and the receiving end.
    #[must_use]
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<PushUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, update: PushUpdate) {
        if self.tx.send(update).is_err() {
            debug!("Push forward receiver dropped");
        }
    }
}

impl ConversationListener for ForwardingListener {
    fn on_new_message(&self, message: Message) {
        self.send(PushUpdate::Message(message));
    }

    fn on_typing(&self, event: TypingEvent) {
        self.send(PushUpdate::Typing(event));
    }

    fn on_error(&self, error: &SyncError) {
        self.send(PushUpdate::Error(error.to_string()));
    }
}

impl InboxListener for ForwardingListener {
    fn on_new_conversation(&self, conversation: Conversation) {
        self.send(PushUpdate::Conversation(conversation));
    }

    fn on_error(&self, error: &SyncError) {
        self.send(PushUpdate::Error(error.to_string()));
    }
}
