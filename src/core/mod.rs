//! Core types: configuration, errors and identifiers.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{
    ApiConfig, CacheConfig, PollingConfig, RealtimeConfig, ReconcileConfig, SyncConfig,
};
pub use errors::{SyncError, SyncResult};
pub use ids::{ConversationId, IdError, MessageId};
