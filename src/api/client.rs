//! REST collaborator abstraction used by the stores.

use std::future::Future;
use std::pin::Pin;

use crate::api::wire::{ConversationFilter, ConversationPage, OutgoingMessage};
use crate::core::errors::SyncResult;
use crate::core::ids::ConversationId;
use crate::model::{Message, StateAction, User};

/// Boxed future type for API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The subset of the backend the sync layer talks to.
///
/// Implemented over HTTP by [`HttpApiClient`](crate::api::HttpApiClient);
/// tests substitute scripted fakes.
pub trait ApiClient: Send + Sync {
    /// `GET /conversations` with the filter's query.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body does not decode.
    fn list_conversations(
        &self,
        filter: ConversationFilter,
    ) -> ApiFuture<'_, SyncResult<ConversationPage>>;

    /// `GET /conversations/{id}`: full message history.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body does not decode.
    fn conversation_messages(
        &self,
        conversation_id: ConversationId,
    ) -> ApiFuture<'_, SyncResult<Vec<Message>>>;

    /// `POST /conversations/{id}/messages`; the created message when the backend echoes it.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn send_message(
        &self,
        conversation_id: ConversationId,
        message: OutgoingMessage,
    ) -> ApiFuture<'_, SyncResult<Option<Message>>>;

    /// `POST /conversations/{id}/{close|reopen|archive}`; a close carries `{reason}`.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn change_state(
        &self,
        conversation_id: ConversationId,
        action: StateAction,
        reason: Option<String>,
    ) -> ApiFuture<'_, SyncResult<()>>;

    /// `GET /validate-token`: the user the session token belongs to.
    ///
    /// # Errors
    /// Returns `Unauthorized` when there is no token or the backend rejects it.
    fn validate_token(&self) -> ApiFuture<'_, SyncResult<User>>;

    /// `POST /typing`.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    fn send_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> ApiFuture<'_, SyncResult<()>>;
}
