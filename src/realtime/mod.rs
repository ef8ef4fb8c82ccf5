//! Realtime channel client: push provider seam, channel registry, typing.

pub mod events;
pub mod local;
pub mod provider;
pub mod registry;
pub mod typing;

pub use events::{ChannelEvent, TypingEvent};
pub use local::LocalPushHub;
pub use provider::{ProviderEvent, PushProvider, PushSink};
pub use registry::{
    ConversationListener, ForwardingListener, InboxListener, PushUpdate, RealtimeClient,
    SubscriptionHandle,
};
pub use typing::{TypingIndicators, TypingPublisher};
