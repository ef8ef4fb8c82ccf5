//! `reqwest` implementation of the REST collaborator.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::api::client::{ApiClient, ApiFuture};
use crate::api::session::AuthSession;
use crate::api::wire::{
    CloseRequest, ConversationFilter, ConversationListBody, ConversationPage, OutgoingMessage,
    TypingRequest, check_envelope, error_message,
};
use crate::core::config::ApiConfig;
use crate::core::errors::{SyncError, SyncResult};
use crate::core::ids::ConversationId;
use crate::model::{Message, StateAction, User};

/// HTTP client for the support backend.
pub struct HttpApiClient {
    client: reqwest::Client,
    base: Url,
    session: Arc<AuthSession>,
    config: ApiConfig,
}

impl HttpApiClient {
    /// Create a client for `config.base_url`, sharing `session` for auth.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(config: ApiConfig, session: Arc<AuthSession>) -> SyncResult<Self> {
        let mut base = Url::parse(&config.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Self::build_client(&config)?;
        Ok(Self {
            client,
            base,
            session,
            config,
        })
    }

    /// Build an HTTP client with JSON headers and the configured timeouts.
    fn build_client(config: &ApiConfig) -> SyncResult<reqwest::Client> {
        use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(ua) = HeaderValue::from_str(concat!("helpdesk-sync/", env!("CARGO_PKG_VERSION"))) {
            headers.insert(USER_AGENT, ua);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .build()
            .map_err(SyncError::Http)
    }

    /// Shared auth session.
    #[must_use]
    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Resolve a path relative to the base URL.
    ///
    /// # Errors
    /// Returns an error if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and return the decoded JSON body.
    ///
    /// A 401 logs the session out before returning `SyncError::Unauthorized`.
    async fn execute(&self, builder: RequestBuilder) -> SyncResult<Value> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!("Backend rejected the bearer token");
            self.session.logout();
            return Err(SyncError::Unauthorized);
        }

        let text = response.text().await?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(
                error_message(&body).unwrap_or("resource").to_string(),
            ));
        }

        if !status.is_success() {
            let message = error_message(&body)
                .map(str::to_string)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_default();
            return Err(SyncError::api(status.as_u16(), message));
        }

        check_envelope(status.as_u16(), &body)?;
        Ok(body)
    }

    /// GET with retries on retryable failures.
    pub(crate) async fn get_value(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Value> {
        let url = self.endpoint(path)?;
        let mut attempt = 0;
        loop {
            let builder = self.request(Method::GET, url.clone()).query(query);
            match self.execute(builder).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.retry_delay(&err);
                    debug!(%url, attempt, ?delay, "Retrying GET after error: {err}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// GET and decode into `T`.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> SyncResult<T> {
        let body = self.get_value(path, query).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// POST a JSON body (or nothing) and return the decoded body.
    pub(crate) async fn post_value<B: Serialize + Sync>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> SyncResult<Value> {
        let url = self.endpoint(path)?;
        let builder = self.request(Method::POST, url);
        let builder = match body {
            Some(body) => builder.json(body),
            None => builder,
        };
        self.execute(builder).await
    }

    /// POST and decode into `T`.
    pub(crate) async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> SyncResult<T> {
        let value = self.post_value(path, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn retry_delay(&self, err: &SyncError) -> Duration {
        let base = err
            .retry_delay()
            .unwrap_or(self.config.retry_delay_ms)
            .min(self.config.retry_delay_ms.max(1) * 10);
        let jitter = rand::thread_rng().gen_range(0..=self.config.retry_delay_ms / 2);
        Duration::from_millis(base + jitter)
    }

    async fn fetch_conversations(&self, filter: ConversationFilter) -> SyncResult<ConversationPage> {
        let body: ConversationListBody = self
            .get_json("conversations", &filter.query_pairs())
            .await?;
        Ok(body.into())
    }

    async fn fetch_messages(&self, conversation_id: ConversationId) -> SyncResult<Vec<Message>> {
        let body = self
            .get_value(&format!("conversations/{conversation_id}"), &[])
            .await?;
        let raw = body.get("messages").cloned().unwrap_or(Value::Array(Vec::new()));
        let mut messages: Vec<Message> = serde_json::from_value(raw)?;
        for message in &mut messages {
            message
                .conversation_id
                .get_or_insert_with(|| conversation_id.clone());
        }
        Ok(messages)
    }

    async fn post_message(
        &self,
        conversation_id: ConversationId,
        message: OutgoingMessage,
    ) -> SyncResult<Option<Message>> {
        let url = self.endpoint(&format!("conversations/{conversation_id}/messages"))?;
        let builder = self.request(Method::POST, url);
        let builder = match message {
            OutgoingMessage::Text(content) => {
                builder.json(&serde_json::json!({ "content": content }))
            }
            OutgoingMessage::File {
                name,
                mime,
                bytes,
                caption,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(name)
                    .mime_str(&mime)?;
                let mut form = reqwest::multipart::Form::new();
                if let Some(caption) = caption {
                    form = form.text("content", caption);
                }
                builder.multipart(form.part("file", part))
            }
        };

        let body = self.execute(builder).await?;
        let echoed = match body.get("message") {
            Some(value) if value.is_object() => {
                let mut message: Message = serde_json::from_value(value.clone())?;
                message
                    .conversation_id
                    .get_or_insert_with(|| conversation_id.clone());
                Some(message)
            }
            _ => None,
        };
        Ok(echoed)
    }
}

impl ApiClient for HttpApiClient {
    fn list_conversations(
        &self,
        filter: ConversationFilter,
    ) -> ApiFuture<'_, SyncResult<ConversationPage>> {
        Box::pin(self.fetch_conversations(filter))
    }

    fn conversation_messages(
        &self,
        conversation_id: ConversationId,
    ) -> ApiFuture<'_, SyncResult<Vec<Message>>> {
        Box::pin(self.fetch_messages(conversation_id))
    }

    fn send_message(
        &self,
        conversation_id: ConversationId,
        message: OutgoingMessage,
    ) -> ApiFuture<'_, SyncResult<Option<Message>>> {
        Box::pin(self.post_message(conversation_id, message))
    }

    fn change_state(
        &self,
        conversation_id: ConversationId,
        action: StateAction,
        reason: Option<String>,
    ) -> ApiFuture<'_, SyncResult<()>> {
        Box::pin(async move {
            let path = format!("conversations/{conversation_id}/{}", action.path());
            let body = (action == StateAction::Close)
                .then(|| CloseRequest { reason: reason.unwrap_or_default() });
            self.post_value(&path, body.as_ref()).await?;
            Ok(())
        })
    }

    fn validate_token(&self) -> ApiFuture<'_, SyncResult<User>> {
        Box::pin(self.current_user())
    }

    fn send_typing(
        &self,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> ApiFuture<'_, SyncResult<()>> {
        Box::pin(async move {
            let body = TypingRequest {
                conversation_id: conversation_id.to_string(),
                is_typing,
            };
            self.post_value("typing", Some(&body)).await?;
            Ok(())
        })
    }
}
