//! Conversation store backing the inbox list.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiFuture, ConversationFilter, ConversationPage, Pagination};
use crate::core::errors::SyncResult;
use crate::core::ids::ConversationId;
use crate::model::{Conversation, ConversationState, Message, SenderType, StateAction};
use crate::realtime::InboxListener;
use crate::refresh::RefreshJob;

#[derive(Default)]
struct InboxState {
    filter: ConversationFilter,
    items: Vec<Conversation>,
    pagination: Pagination,
    epoch: u64,
    loading: bool,
    last_error: Option<String>,
    open: Option<ConversationId>,
}

impl InboxState {
    fn find_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.items.iter_mut().find(|c| &c.id == id)
    }
}

/// Owns the inbox list: the last committed page plus local patches.
pub struct ConversationStore {
    api: Arc<dyn ApiClient>,
    state: Mutex<InboxState>,
}

impl ConversationStore {
    /// Empty store listing `page_size` conversations per page.
    #[must_use]
    pub fn new(api: Arc<dyn ApiClient>, page_size: u32) -> Self {
        let filter = ConversationFilter {
            limit: page_size,
            ..ConversationFilter::default()
        };
        Self {
            api,
            state: Mutex::new(InboxState {
                filter,
                ..InboxState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch a page under `filter` and make it the current list.
    ///
    /// A response is committed only if no newer fetch was issued in the
    /// meantime; a superseded response is still returned to the caller.
    ///
    /// # Errors
    /// Returns an error if the request fails; it is also kept as `last_error`.
    pub async fn fetch(&self, filter: ConversationFilter) -> SyncResult<ConversationPage> {
        let epoch = {
            let mut state = self.lock();
            state.epoch += 1;
            state.filter = filter.clone();
            state.loading = true;
            state.epoch
        };

        let result = self.api.list_conversations(filter).await;

        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(epoch, latest = state.epoch, "Dropping superseded inbox page");
            return result;
        }
        state.loading = false;
        match &result {
            Ok(page) => {
                let mut items = page.items.clone();
                if let Some(open) = state.open.as_ref() {
                    if let Some(c) = items.iter_mut().find(|c| &c.id == open) {
                        c.is_read = true;
                        c.has_new_messages = false;
                    }
                }
                state.items = items;
                state.pagination = page.pagination;
                state.last_error = None;
            }
            Err(err) => state.last_error = Some(err.to_string()),
        }
        result
    }

    /// Re-fetch with the current filter.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn refresh(&self) -> SyncResult<ConversationPage> {
        let filter = self.filter();
        self.fetch(filter).await
    }

    /// Restrict the list to one state (or everything but archived) and re-fetch page 1.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn set_status_filter(&self, status: Option<ConversationState>) -> SyncResult<ConversationPage> {
        let filter = ConversationFilter {
            status,
            page: 1,
            ..self.filter()
        };
        self.fetch(filter).await
    }

    /// Search by text and re-fetch page 1.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn set_search(&self, search: Option<String>) -> SyncResult<ConversationPage> {
        let search = search.filter(|s| !s.trim().is_empty());
        let filter = ConversationFilter {
            search,
            page: 1,
            ..self.filter()
        };
        self.fetch(filter).await
    }

    /// Go to `page` and re-fetch.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn set_page(&self, page: u32) -> SyncResult<ConversationPage> {
        let filter = ConversationFilter {
            page: page.max(1),
            ..self.filter()
        };
        self.fetch(filter).await
    }

    /// Move a conversation to `requested`.
    ///
    /// `active` on a closed conversation reopens it, `closed` closes,
    /// `archived` archives; anything else is a no-op. The list is patched
    /// first, then re-fetched whether the request succeeded or not.
    ///
    /// # Errors
    /// Returns the backend error when the transition fails.
    pub async fn update_state(&self, id: &ConversationId, requested: ConversationState) -> SyncResult<()> {
        self.transition(id, requested, None).await
    }

    /// Close a conversation, telling the backend why.
    ///
    /// # Errors
    /// Returns the backend error when the close fails.
    pub async fn close_with_reason(&self, id: &ConversationId, reason: impl Into<String>) -> SyncResult<()> {
        self.transition(id, ConversationState::Closed, Some(reason.into()))
            .await
    }

    async fn transition(
        &self,
        id: &ConversationId,
        requested: ConversationState,
        reason: Option<String>,
    ) -> SyncResult<()> {
        let action = {
            let mut state = self.lock();
            let current = state.find_mut(id).map_or(ConversationState::Pending, |c| c.state);
            let Some(action) = StateAction::for_transition(current, requested) else {
                debug!(conversation_id = %id, %current, %requested, "No backend action for transition");
                return Ok(());
            };
            if let Some(conversation) = state.find_mut(id) {
                conversation.set_state(action.target_state());
            }
            action
        };

        let result = self.api.change_state(id.clone(), action, reason).await;
        let refetch = self.refresh().await;

        match result {
            Ok(()) => {
                info!(conversation_id = %id, action = action.path(), "Conversation state changed");
                if let Err(err) = refetch {
                    warn!("Inbox refresh after state change failed: {err}");
                }
                Ok(())
            }
            Err(err) => {
                warn!(conversation_id = %id, action = action.path(), "State change failed: {err}");
                Err(err)
            }
        }
    }

    /// Patch the preview of `conversation_id` from a pushed message.
    ///
    /// Returns `false` when the conversation is not in the list, so the
    /// caller may refresh.
    pub fn apply_incremental_message(&self, conversation_id: &ConversationId, message: &Message) -> bool {
        let mut state = self.lock();
        let is_open = state.open.as_ref() == Some(conversation_id);
        let Some(conversation) = state.find_mut(conversation_id) else {
            return false;
        };
        conversation.last_message = Some(message.preview_text());
        conversation.last_message_at = Some(message.created_at);
        if message.sender_type == SenderType::Visitor && !is_open {
            conversation.is_read = false;
            conversation.has_new_messages = true;
        }
        true
    }

    /// Insert a pushed conversation at the top if the filter admits it.
    pub fn apply_new_conversation(&self, conversation: Conversation) -> bool {
        let mut state = self.lock();
        if !state.filter.admits(conversation.state)
            || state.items.iter().any(|c| c.id == conversation.id)
        {
            return false;
        }
        debug!(conversation_id = %conversation.id, "New conversation inserted");
        state.items.insert(0, conversation);
        state.pagination.total += 1;
        true
    }

    /// Clear the unread flags of `id`.
    pub fn mark_read(&self, id: &ConversationId) -> bool {
        let mut state = self.lock();
        let Some(conversation) = state.find_mut(id) else {
            return false;
        };
        conversation.is_read = true;
        conversation.has_new_messages = false;
        true
    }

    /// Tell the store which conversation the chat view shows.
    pub fn set_open_conversation(&self, id: Option<ConversationId>) {
        if let Some(id) = id.as_ref() {
            self.mark_read(id);
        }
        self.lock().open = id;
    }

    /// Drop the list and all local state. Used on logout.
    pub fn reset(&self) {
        let mut state = self.lock();
        let filter = ConversationFilter {
            limit: state.filter.limit,
            ..ConversationFilter::default()
        };
        let epoch = state.epoch + 1;
        *state = InboxState {
            filter,
            epoch,
            ..InboxState::default()
        };
    }

    /// Current list.
    #[must_use]
    pub fn items(&self) -> Vec<Conversation> {
        self.lock().items.clone()
    }

    /// One conversation from the list.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().items.iter().find(|c| &c.id == id).cloned()
    }

    /// Pagination of the committed page.
    #[must_use]
    pub fn pagination(&self) -> Pagination {
        self.lock().pagination
    }

    /// Current filter.
    #[must_use]
    pub fn filter(&self) -> ConversationFilter {
        self.lock().filter.clone()
    }

    /// Error of the last committed fetch.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// A fetch is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Conversations rendered as unread.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.lock().items.iter().filter(|c| c.is_unread()).count()
    }
}

impl InboxListener for ConversationStore {
    fn on_new_conversation(&self, conversation: Conversation) {
        self.apply_new_conversation(conversation);
    }
}

impl RefreshJob for ConversationStore {
    fn name(&self) -> &'static str {
        "inbox"
    }

    fn refresh(&self) -> ApiFuture<'_, SyncResult<bool>> {
        Box::pin(async move {
            ConversationStore::refresh(self).await?;
            Ok(true)
        })
    }
}
