//! Inbox: the conversation list and its patches.

pub mod store;

pub use store::ConversationStore;
