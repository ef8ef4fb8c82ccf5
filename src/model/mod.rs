//! Data model shared by the stores, the API client and the mock backend.

pub mod account;
pub mod conversation;
pub mod message;
pub mod time;

pub use account::{
    AuthGrant, LoginRequest, OnboardingState, OnboardingUpdate, RegisterRequest, User,
    WidgetPosition, WidgetSettings,
};
pub use conversation::{Conversation, ConversationState, StateAction, VisitorMeta};
pub use message::{Message, MessageKind, SenderType};
pub use time::{parse_timestamp, relative_label};
