//! Process-wide message cache.
//!
//! One entry per conversation, bounded by an LRU over conversation ids.
//! Writers always merge through the reducer, so a slow fetch can never wipe
//! messages another writer already stored. Only confirmed messages are kept;
//! optimistic placeholders live in the open thread alone.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use tracing::debug;

use crate::chat::reducer::{apply_message, reconcile};
use crate::core::config::CacheConfig;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::ids::ConversationId;
use crate::model::Message;

/// Thread-safe cache of confirmed messages keyed by conversation.
pub struct MessageCache {
    config: CacheConfig,
    echo_window: Duration,
    threads: DashMap<ConversationId, Vec<Message>>,
    recency: Mutex<LruCache<ConversationId, ()>>,
}

impl MessageCache {
    /// Create a cache with the given configuration.
    ///
    /// # Errors
    /// Returns an error if `max_conversations` is zero.
    pub fn new(config: CacheConfig, echo_window: Duration) -> SyncResult<Self> {
        let capacity = NonZeroUsize::new(config.max_conversations).ok_or_else(|| {
            SyncError::Config("cache.max_conversations must be > 0".to_string())
        })?;
        Ok(Self {
            config,
            echo_window,
            threads: DashMap::new(),
            recency: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Cached thread for `conversation_id`, if any.
    #[must_use]
    pub fn get(&self, conversation_id: &ConversationId) -> Option<Vec<Message>> {
        if !self.config.enabled {
            return None;
        }
        let hit = self.threads.get(conversation_id).map(|entry| entry.value().clone());
        if hit.is_some() {
            debug!(%conversation_id, "Message cache hit");
            self.touch(conversation_id);
        }
        hit
    }

    /// Merge a fetched batch into the cached thread and return the result.
    pub fn merge(&self, conversation_id: &ConversationId, fetched: Vec<Message>) -> Vec<Message> {
        let fetched: Vec<Message> = fetched
            .into_iter()
            .filter(|m| !m.is_placeholder() && m.belongs_to(conversation_id))
            .collect();
        if !self.config.enabled {
            return fetched;
        }

        let merged = {
            let mut entry = self.threads.entry(conversation_id.clone()).or_default();
            let merged = reconcile(&entry, fetched, self.echo_window);
            *entry = merged.clone();
            merged
        };
        self.touch(conversation_id);
        merged
    }

    /// Fold one confirmed message into the cached thread.
    pub fn apply(&self, conversation_id: &ConversationId, message: Message) {
        if !self.config.enabled || message.is_placeholder() || !message.belongs_to(conversation_id) {
            return;
        }
        {
            let mut entry = self.threads.entry(conversation_id.clone()).or_default();
            apply_message(&mut entry, message, self.echo_window);
        }
        self.touch(conversation_id);
    }

    /// Drop everything. Called on logout.
    pub fn clear(&self) {
        self.threads.clear();
        self.recency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Message cache cleared");
    }

    /// Number of cached conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            conversations: self.threads.len(),
            messages: self.threads.iter().map(|entry| entry.value().len()).sum(),
        }
    }

    /// Mark `conversation_id` as most recently used, evicting the oldest over capacity.
    fn touch(&self, conversation_id: &ConversationId) {
        let evicted = self
            .recency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conversation_id.clone(), ());
        if let Some((old, ())) = evicted {
            if &old != conversation_id {
                debug!(conversation_id = %old, "Evicting cached thread");
                self.threads.remove(&old);
            }
        }
    }
}

/// Cache statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached conversations.
    pub conversations: usize,
    /// Cached messages across all conversations.
    pub messages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::MessageId;
    use chrono::{TimeZone, Utc};

    fn cache(max: usize) -> MessageCache {
        MessageCache::new(
            CacheConfig {
                enabled: true,
                max_conversations: max,
            },
            Duration::from_secs(60),
        )
        .unwrap_or_else(|e| panic!("{e}"))
    }

    fn msg(conv: u64, id: u64, secs: i64) -> Message {
        let at = Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap_or_default();
        let mut m = Message::optimistic(MessageId::from(id), ConversationId::from(conv), "x", at);
        m.temp = false;
        m
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = MessageCache::new(
            CacheConfig {
                enabled: true,
                max_conversations: 0,
            },
            Duration::from_secs(60),
        );
        assert!(matches!(err, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_merge_never_drops_existing() {
        let cache = cache(4);
        let conv = ConversationId::from(1);
        cache.merge(&conv, vec![msg(1, 1, 0), msg(1, 2, 1)]);
        cache.apply(&conv, msg(1, 3, 2));

        // An older fetch that only knows about message 1 lands last.
        let merged = cache.merge(&conv, vec![msg(1, 1, 0)]);
        assert_eq!(merged.len(), 3);
        assert_eq!(cache.get(&conv).map(|m| m.len()), Some(3));
    }

    #[test]
    fn test_placeholders_and_foreign_messages_are_not_cached() {
        let cache = cache(4);
        let conv = ConversationId::from(1);
        let at = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();
        cache.apply(&conv, Message::optimistic(MessageId::temp(1), conv.clone(), "hi", at));
        cache.apply(&conv, msg(2, 9, 0));
        assert!(cache.get(&conv).is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = cache(2);
        for conv in 1..=2 {
            cache.merge(&ConversationId::from(conv), vec![msg(conv, conv, 0)]);
        }
        // Touch 1 so 2 becomes the oldest.
        assert!(cache.get(&ConversationId::from(1)).is_some());
        cache.merge(&ConversationId::from(3), vec![msg(3, 3, 0)]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&ConversationId::from(2)).is_none());
        assert!(cache.get(&ConversationId::from(1)).is_some());
    }

    #[test]
    fn test_clear_and_stats() {
        let cache = cache(4);
        cache.merge(&ConversationId::from(1), vec![msg(1, 1, 0), msg(1, 2, 1)]);
        cache.merge(&ConversationId::from(2), vec![msg(2, 3, 0)]);
        assert_eq!(
            cache.stats(),
            CacheStats {
                conversations: 2,
                messages: 3
            }
        );
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_returns_nothing() {
        let cache = MessageCache::new(
            CacheConfig {
                enabled: false,
                max_conversations: 4,
            },
            Duration::from_secs(60),
        )
        .unwrap_or_else(|e| panic!("{e}"));
        let conv = ConversationId::from(1);
        assert_eq!(cache.merge(&conv, vec![msg(1, 1, 0)]).len(), 1);
        assert!(cache.get(&conv).is_none());
    }
}
