use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderName, HeaderValue, CACHE_CONTROL};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use minirag_store::types::{BotProfile, Chat, Message};
use minirag_rag::TurnEvent;

use crate::admission::cross_tenant_ref;
use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

/// Auto-titles take the opening of the first user message.
const TITLE_MAX_CHARS: usize = 80;

#[derive(Deserialize)]
pub struct SendRequest {
    /// Required when starting a new chat; ignored when `chat_id` is given.
    #[serde(default)]
    pub bot_profile_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

fn title_from(message: &str) -> String {
    message.trim().chars().take(TITLE_MAX_CHARS).collect()
}

/// POST /v1/chat: send a message; `stream=true` switches the response to
/// Server-Sent Events.
pub async fn send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> ApiResult<Response> {
    let auth = resolve_bearer(&state, &headers)?;
    if req.message.trim().is_empty() {
        return Err(ApiError::InvalidInput("message must not be empty".to_string()));
    }

    // Resume or open the chat; either way the bot is loaded under the
    // caller's tenant.
    let (chat, bot): (Chat, BotProfile) = match &req.chat_id {
        Some(chat_id) => {
            let chat = state.store.get_chat(chat_id, &auth.tenant_id)?;
            let bot = state
                .store
                .get_bot_profile(&chat.bot_profile_id, &auth.tenant_id)?;
            (chat, bot)
        }
        None => {
            let bot_id = req.bot_profile_id.as_deref().ok_or_else(|| {
                ApiError::InvalidInput("bot_profile_id is required for a new chat".to_string())
            })?;
            let bot = cross_tenant_ref(
                state.store.get_bot_profile(bot_id, &auth.tenant_id),
                "bot_profile_id",
            )?;
            let chat = state.store.create_chat(
                &auth.tenant_id,
                &bot.id,
                &auth.user_id,
                &title_from(&req.message),
            )?;
            (chat, bot)
        }
    };

    if !bot.is_active {
        return Err(ApiError::InvalidInput("bot profile is inactive".to_string()));
    }

    if req.stream {
        let rx = state
            .orchestrator
            .run_chat_turn_stream(&auth, &bot, &chat.id, &req.message);
        Ok(sse_response(rx))
    } else {
        let turn = state
            .orchestrator
            .run_chat_turn(&auth, &bot, &chat.id, &req.message)
            .await?;
        Ok(Json(turn).into_response())
    }
}

/// Serialize turn events as the SSE contract: `sources`, `delta`*, then
/// `done`; or `error`, after which the connection closes.
fn sse_response(mut rx: tokio::sync::mpsc::Receiver<TurnEvent>) -> Response {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let frame: Result<Event, Infallible> = Ok(match &event {
                TurnEvent::Sources { sources } => Event::default()
                    .event("sources")
                    .data(serde_json::json!({ "sources": sources }).to_string()),
                TurnEvent::Delta { content } => Event::default()
                    .event("delta")
                    .data(serde_json::json!({ "content": content }).to_string()),
                TurnEvent::Done {
                    chat_id,
                    message_id,
                    usage,
                } => Event::default().event("done").data(
                    serde_json::json!({
                        "chat_id": chat_id,
                        "message_id": message_id,
                        "usage": usage,
                    })
                    .to_string(),
                ),
                TurnEvent::Error { detail } => Event::default()
                    .event("error")
                    .data(serde_json::json!({ "detail": detail }).to_string()),
            });
            let terminal = matches!(event, TurnEvent::Done { .. } | TurnEvent::Error { .. });
            yield frame;
            if terminal {
                break;
            }
        }
    };

    let mut resp = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    let headers = resp.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    resp
}

/// GET /v1/chat
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Chat>>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.list_chats(
        &auth.tenant_id,
        query.limit.min(200),
        query.offset,
    )?))
}

/// GET /v1/chat/{id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Chat>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.get_chat(&id, &auth.tenant_id)?))
}

/// GET /v1/chat/{id}/messages
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let auth = resolve_bearer(&state, &headers)?;
    // 404 for a chat outside the tenant, not an empty list.
    state.store.get_chat(&id, &auth.tenant_id)?;
    Ok(Json(state.store.list_messages(&id, &auth.tenant_id)?))
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    /// "positive", "negative", or null to clear.
    pub feedback: Option<String>,
}

/// PATCH /v1/chat/{id}/messages/{mid}/feedback
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<Json<Message>> {
    let auth = resolve_bearer(&state, &headers)?;

    if let Some(value) = req.feedback.as_deref() {
        if value != "positive" && value != "negative" {
            return Err(ApiError::InvalidInput(
                "feedback must be \"positive\", \"negative\", or null".to_string(),
            ));
        }
    }

    let message = state.store.set_message_feedback(
        &chat_id,
        &message_id,
        &auth.tenant_id,
        req.feedback.as_deref(),
    )?;
    Ok(Json(message))
}
