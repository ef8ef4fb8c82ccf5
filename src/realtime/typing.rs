//! Typing indicators: incoming expiry and outgoing debounce.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::errors::SyncResult;
use crate::core::ids::ConversationId;
use crate::model::SenderType;
use crate::realtime::events::TypingEvent;
use crate::realtime::registry::RealtimeClient;

/// Incoming typing indicators, expiring after a silence window.
pub struct TypingIndicators {
    ttl: Duration,
    active: DashMap<ConversationId, (SenderType, Instant)>,
}

impl TypingIndicators {
    /// Indicators that expire `ttl` after the last `is_typing=true`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: DashMap::new(),
        }
    }

    /// Record an event for `conversation_id`.
    pub fn on_event(&self, conversation_id: &ConversationId, event: TypingEvent) {
        if event.is_typing {
            self.active
                .insert(conversation_id.clone(), (event.sender_type, Instant::now()));
        } else {
            self.active.remove(conversation_id);
        }
    }

    /// Who is typing in `conversation_id`, if the indicator is still fresh.
    #[must_use]
    pub fn typing(&self, conversation_id: &ConversationId) -> Option<SenderType> {
        let ttl = self.ttl;
        {
            let entry = self.active.get(conversation_id)?;
            let (sender, at) = *entry.value();
            if at.elapsed() < ttl {
                return Some(sender);
            }
        }
        self.active
            .remove_if(conversation_id, |_, (_, at)| at.elapsed() >= ttl);
        None
    }

    /// Forget `conversation_id`.
    pub fn clear(&self, conversation_id: &ConversationId) {
        self.active.remove(conversation_id);
    }

    /// Forget everything.
    pub fn clear_all(&self) {
        self.active.clear();
    }
}

#[derive(Default)]
struct PublisherState {
    typing: bool,
    generation: u64,
}

/// Debounced publisher of the agent's own typing state.
///
/// A keystroke with non-empty input sends `true` unless `true` is already
/// in effect; `false` goes out after the idle timeout, on empty input, or
/// when the message is sent.
pub struct TypingPublisher {
    realtime: Arc<RealtimeClient>,
    conversation_id: ConversationId,
    idle: Duration,
    state: Arc<Mutex<PublisherState>>,
}

impl TypingPublisher {
    /// Publisher for one conversation.
    #[must_use]
    pub fn new(realtime: Arc<RealtimeClient>, conversation_id: ConversationId, idle: Duration) -> Self {
        Self {
            realtime,
            conversation_id,
            idle,
            state: Arc::new(Mutex::new(PublisherState::default())),
        }
    }

    /// The input box changed.
    ///
    /// # Errors
    /// Returns an error if publishing fails.
    pub async fn on_input(&self, text: &str) -> SyncResult<()> {
        if text.trim().is_empty() {
            return self.stop().await;
        }

        let (send_start, generation) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.generation += 1;
            let send_start = !state.typing;
            state.typing = true;
            (send_start, state.generation)
        };

        self.arm_idle_timer(generation);
        if send_start {
            self.realtime.publish_typing(&self.conversation_id, true).await?;
        }
        Ok(())
    }

    /// The message was sent or the input cleared.
    ///
    /// # Errors
    /// Returns an error if publishing fails.
    pub async fn stop(&self) -> SyncResult<()> {
        let was_typing = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.generation += 1;
            std::mem::replace(&mut state.typing, false)
        };
        if was_typing {
            self.realtime.publish_typing(&self.conversation_id, false).await?;
        }
        Ok(())
    }

    /// Whether `true` is currently in effect.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .typing
    }

    fn arm_idle_timer(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        let realtime = Arc::clone(&self.realtime);
        let conversation_id = self.conversation_id.clone();
        let idle = self.idle;

        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let expired = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.generation == generation && state.typing {
                    state.typing = false;
                    true
                } else {
                    false
                }
            };
            if expired {
                debug!(%conversation_id, "Typing idle timeout");
                if let Err(err) = realtime.publish_typing(&conversation_id, false).await {
                    warn!(%conversation_id, "Failed to publish typing stop: {err}");
                }
            }
        });
    }
}
