//! REST collaborator: client trait, HTTP implementation, auth session and wire shapes.

pub mod client;
pub mod http;
pub mod session;
pub mod wire;

pub use client::{ApiClient, ApiFuture};
pub use http::HttpApiClient;
pub use session::AuthSession;
pub use wire::{
    CloseRequest, ConversationFilter, ConversationPage, OutgoingMessage, Pagination, TypingRequest,
};
