//! Push provider abstraction.

use std::sync::Arc;

use serde_json::Value;

use crate::api::ApiFuture;
use crate::core::errors::SyncResult;

/// Raw event delivered by a push provider for one channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// The provider confirmed the channel subscription.
    Subscribed,
    /// Application event with its JSON payload.
    Event {
        /// Event name, e.g. `new-message`.
        name: String,
        /// Event payload.
        payload: Value,
    },
    /// Connection or authorization failure for the channel.
    Error(String),
}

/// Callback the provider invokes for every event on a channel.
pub type PushSink = Arc<dyn Fn(ProviderEvent) + Send + Sync>;

/// A pub/sub transport (hosted websocket service, in-process hub, ...).
///
/// The registry keeps at most one provider subscription per channel, so
/// implementations may assume `subscribe` is not called twice for the same
/// channel without an `unsubscribe` in between.
pub trait PushProvider: Send + Sync {
    /// Start delivering `channel` events to `sink`.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be established.
    fn subscribe(&self, channel: String, sink: PushSink) -> ApiFuture<'_, SyncResult<()>>;

    /// Stop delivering `channel` events.
    ///
    /// # Errors
    /// Returns an error if the provider fails to tear the subscription down.
    fn unsubscribe(&self, channel: String) -> ApiFuture<'_, SyncResult<()>>;
}
