//! In-process push provider.
//!
//! Used by the mock backend to fan events out to clients living in the same
//! process, and by tests to script provider behavior.

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::api::ApiFuture;
use crate::core::errors::{SyncError, SyncResult};
use crate::realtime::provider::{ProviderEvent, PushProvider, PushSink};

/// Channel hub delivering events synchronously to subscribed sinks.
#[derive(Default)]
pub struct LocalPushHub {
    sinks: DashMap<String, PushSink>,
    refused: DashMap<String, String>,
}

impl LocalPushHub {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an application event. Returns whether anyone was listening.
    pub fn publish(&self, channel: &str, event: &str, payload: Value) -> bool {
        self.emit(
            channel,
            ProviderEvent::Event {
                name: event.to_string(),
                payload,
            },
        )
    }

    /// Deliver a raw provider event.
    pub fn emit(&self, channel: &str, event: ProviderEvent) -> bool {
        let Some(sink) = self.sinks.get(channel).map(|s| s.value().clone()) else {
            debug!(channel, "No subscriber for local push");
            return false;
        };
        sink(event);
        true
    }

    /// Make the next subscriptions to `channel` fail with `reason`.
    pub fn refuse(&self, channel: &str, reason: &str) {
        self.refused.insert(channel.to_string(), reason.to_string());
    }

    /// Whether `channel` has an active subscription.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.sinks.contains_key(channel)
    }

    /// Number of active channel subscriptions.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.sinks.len()
    }
}

impl PushProvider for LocalPushHub {
    fn subscribe(&self, channel: String, sink: PushSink) -> ApiFuture<'_, SyncResult<()>> {
        Box::pin(async move {
            if let Some(reason) = self.refused.get(&channel) {
                return Err(SyncError::Realtime(reason.value().clone()));
            }
            self.sinks.insert(channel, sink.clone());
            sink(ProviderEvent::Subscribed);
            Ok(())
        })
    }

    fn unsubscribe(&self, channel: String) -> ApiFuture<'_, SyncResult<()>> {
        Box::pin(async move {
            self.sinks.remove(&channel);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_publish_reaches_sink() {
        let hub = LocalPushHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sink: PushSink = Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!hub.publish("conversation.1", "typing", Value::Null));
        assert!(hub.subscribe("conversation.1".into(), sink).await.is_ok());
        assert!(hub.publish("conversation.1", "typing", Value::Null));
        // Subscribed + one event.
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        assert!(hub.unsubscribe("conversation.1".into()).await.is_ok());
        assert!(!hub.is_subscribed("conversation.1"));
    }

    #[tokio::test]
    async fn test_refused_channel() {
        let hub = LocalPushHub::new();
        hub.refuse("conversation.2", "forbidden");
        let sink: PushSink = Arc::new(|_event| {});
        let result = hub.subscribe("conversation.2".into(), sink).await;
        assert!(matches!(result, Err(SyncError::Realtime(reason)) if reason == "forbidden"));
        assert_eq!(hub.channel_count(), 0);
    }
}
