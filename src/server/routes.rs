//! HTTP route handlers for the mock helpdesk API.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{CloseRequest, TypingRequest};
use crate::core::ids::ConversationId;
use crate::model::{ConversationState, LoginRequest, OnboardingUpdate, RegisterRequest, SenderType, User};

use super::state::{MockState, ONBOARDING_STEPS, Transition};

/// Error reply in the backend's `{status: "error", message}` envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthenticated.")
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "status": "error", "message": self.message })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn success(mut body: Value) -> Json<Value> {
    if let Value::Object(map) = &mut body {
        map.insert("status".to_string(), Value::from("success"));
    }
    Json(body)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token to its user, or reply 401.
fn authorize(state: &MockState, headers: &HeaderMap) -> Result<(String, User), ApiError> {
    let token = bearer(headers).ok_or_else(ApiError::unauthorized)?;
    let user = state.user_for(token).ok_or_else(ApiError::unauthorized)?;
    Ok((token.to_string(), user))
}

fn conversation_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::invalid("conversation id is required"))
}

/// Create the API router with all routes.
pub fn create_router(state: Arc<MockState>) -> Router {
    let api = Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/validate-token", get(validate_token))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{id}", get(conversation_messages))
        .route("/conversations/{id}/messages", post(send_message))
        .route("/conversations/{id}/close", post(close_conversation))
        .route("/conversations/{id}/reopen", post(reopen_conversation))
        .route("/conversations/{id}/archive", post(archive_conversation))
        .route("/typing", post(typing))
        .route("/onboarding", get(onboarding))
        .route("/onboarding/update", post(update_onboarding))
        .route("/onboarding/skip", post(skip_onboarding))
        .route("/widget", get(widget));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "helpdesk-mock",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn login(State(state): State<Arc<MockState>>, Json(request): Json<LoginRequest>) -> ApiResult {
    let (token, user) = state
        .login(&request.email, &request.password)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Invalid credentials"))?;
    Ok(grant(&state, &token, &user))
}

fn grant(state: &MockState, token: &str, user: &User) -> Json<Value> {
    let onboarding_completed = state.onboarding(token).is_some_and(|o| o.completed);
    success(json!({
        "token": token,
        "user": user,
        "onboarding_completed": onboarding_completed,
    }))
}

async fn register(State(state): State<Arc<MockState>>, Json(request): Json<RegisterRequest>) -> ApiResult {
    if request.name.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::invalid("name and password are required"));
    }
    state
        .add_account(&request.name, &request.email, &request.password)
        .ok_or_else(|| ApiError::invalid("The email has already been taken."))?;
    let (token, user) = state
        .login(&request.email, &request.password)
        .ok_or_else(|| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "account not stored"))?;
    Ok(grant(&state, &token, &user))
}

async fn validate_token(State(state): State<Arc<MockState>>, headers: HeaderMap) -> ApiResult {
    let (_, user) = authorize(&state, &headers)?;
    Ok(success(json!({ "user": user })))
}

/// Query string of `GET /conversations`.
#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    status: Option<String>,
    search: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

async fn list_conversations(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    authorize(&state, &headers)?;
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<ConversationState>()
                .map_err(|s| ApiError::invalid(format!("unknown status {s}")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let page = query.page.unwrap_or(1).max(1);

    let matching = state.list(status, query.search.as_deref());
    let total = matching.len();
    let total_pages = total.div_ceil(limit as usize);
    let conversations: Vec<_> = matching
        .into_iter()
        .skip((page as usize - 1) * limit as usize)
        .take(limit as usize)
        .collect();

    Ok(success(json!({
        "conversations": conversations,
        "total": total,
        "total_pages": total_pages,
        "page": page,
    })))
}

async fn conversation_messages(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    authorize(&state, &headers)?;
    let id = conversation_id(&id)?;
    let messages = state
        .messages(&id)
        .ok_or_else(|| ApiError::not_found("conversation"))?;
    Ok(success(json!({ "messages": messages })))
}

#[derive(Deserialize)]
struct TextBody {
    #[serde(default)]
    content: String,
}

/// Accepts `{content}` JSON or a multipart `file` upload with an optional `content` caption.
async fn send_message(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult {
    authorize(&state, request.headers())?;
    let id = conversation_id(&id)?;

    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let message = if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::invalid(e.body_text()))?;
        let mut upload = None;
        let mut caption = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::invalid(e.body_text()))?
        {
            let part = field.name().map(str::to_string);
            match part.as_deref() {
                Some("content") => {
                    let text = field.text().await.map_err(|e| ApiError::invalid(e.body_text()))?;
                    caption = Some(text.trim().to_string()).filter(|t| !t.is_empty());
                    continue;
                }
                Some("file") => {}
                _ => continue,
            }
            let name = field.file_name().unwrap_or("upload").to_string();
            let mime = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field.bytes().await.map_err(|e| ApiError::invalid(e.body_text()))?;
            upload = Some((name, mime, bytes.len() as u64));
        }
        let (name, mime, size) = upload.ok_or_else(|| ApiError::invalid("file is required"))?;
        state.agent_file(&id, &name, &mime, size, caption.as_deref())
    } else {
        let Json(body) = Json::<TextBody>::from_request(request, &())
            .await
            .map_err(|e| ApiError::invalid(e.body_text()))?;
        let content = body.content.trim();
        if content.is_empty() {
            return Err(ApiError::invalid("content is required"));
        }
        state.agent_message(&id, content)
    };

    let message = message.ok_or_else(|| ApiError::not_found("conversation"))?;
    Ok(success(json!({ "message": message })))
}

fn transition(state: &MockState, headers: &HeaderMap, id: &str, target: ConversationState) -> ApiResult {
    authorize(state, headers)?;
    let id = conversation_id(id)?;
    match state.transition(&id, target) {
        Transition::Done(now) => Ok(success(json!({ "state": now }))),
        Transition::Missing => Err(ApiError::not_found("conversation")),
        Transition::Rejected(current) => Err(ApiError::invalid(format!(
            "cannot move a {current} conversation to {target}"
        ))),
    }
}

/// The body is an optional `{reason}`.
async fn close_conversation(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let request: CloseRequest = if body.is_empty() {
        CloseRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::invalid(e.to_string()))?
    };
    let reply = transition(&state, &headers, &id, ConversationState::Closed)?;
    let reason = request.reason.trim();
    if !reason.is_empty() {
        state.record_close_reason(&conversation_id(&id)?, reason);
    }
    Ok(reply)
}

async fn reopen_conversation(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    transition(&state, &headers, &id, ConversationState::Active)
}

async fn archive_conversation(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    transition(&state, &headers, &id, ConversationState::Archived)
}

async fn typing(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(request): Json<TypingRequest>,
) -> ApiResult {
    authorize(&state, &headers)?;
    let id = conversation_id(&request.conversation_id)?;
    if !state.typing(&id, SenderType::Agent, request.is_typing) {
        return Err(ApiError::not_found("conversation"));
    }
    Ok(success(json!({})))
}

async fn onboarding(State(state): State<Arc<MockState>>, headers: HeaderMap) -> ApiResult {
    let (token, _) = authorize(&state, &headers)?;
    let progress = state.onboarding(&token).ok_or_else(ApiError::unauthorized)?;
    Ok(success(json!({ "onboarding": progress })))
}

async fn update_onboarding(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(update): Json<OnboardingUpdate>,
) -> ApiResult {
    let (token, _) = authorize(&state, &headers)?;
    if update.step == 0 {
        return Err(ApiError::invalid("step must be >= 1"));
    }
    let progress = state
        .update_onboarding(&token, |progress| {
            progress.current_step = progress.current_step.max(update.step + 1).min(ONBOARDING_STEPS);
            if update.step >= ONBOARDING_STEPS {
                progress.completed = true;
            }
            if update.company_name.is_some() {
                progress.company_name = update.company_name;
            }
            if update.website_url.is_some() {
                progress.website_url = update.website_url;
            }
            progress.data.extend(update.data);
        })
        .ok_or_else(ApiError::unauthorized)?;
    Ok(success(json!({ "onboarding": progress })))
}

async fn skip_onboarding(State(state): State<Arc<MockState>>, headers: HeaderMap) -> ApiResult {
    let (token, _) = authorize(&state, &headers)?;
    let progress = state
        .update_onboarding(&token, |progress| {
            progress.skipped = true;
            progress.completed = true;
        })
        .ok_or_else(ApiError::unauthorized)?;
    Ok(success(json!({ "onboarding": progress })))
}

async fn widget(State(state): State<Arc<MockState>>, headers: HeaderMap) -> ApiResult {
    authorize(&state, &headers)?;
    Ok(success(json!({ "widget": state.widget() })))
}
