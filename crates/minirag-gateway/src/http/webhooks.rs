use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use minirag_hooks::{EVENT_CHAT_MESSAGE, EVENT_PING, EVENT_SOURCE_FAILED, EVENT_SOURCE_INGESTED};
use minirag_store::types::Webhook;

use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

const SUBSCRIBABLE: [&str; 3] = [EVENT_SOURCE_INGESTED, EVENT_SOURCE_FAILED, EVENT_CHAT_MESSAGE];

#[derive(Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
}

#[derive(Serialize)]
pub struct CreateWebhookResponse {
    pub webhook: Webhook,
    /// Shown exactly once; receivers use it to verify signatures.
    pub secret: String,
}

/// POST /v1/webhooks
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateWebhookRequest>,
) -> ApiResult<(StatusCode, Json<CreateWebhookResponse>)> {
    let auth = resolve_bearer(&state, &headers)?;

    if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
        return Err(ApiError::InvalidInput("url must be http(s)".to_string()));
    }
    if req.events.is_empty() {
        return Err(ApiError::InvalidInput("events must not be empty".to_string()));
    }
    for event in &req.events {
        if !SUBSCRIBABLE.contains(&event.as_str()) {
            return Err(ApiError::InvalidInput(format!(
                "unknown event type: {}",
                event
            )));
        }
    }

    let secret = minirag_crypto::generate_secret("whs_");
    let webhook = state
        .store
        .create_webhook(&auth.tenant_id, &req.url, &secret, &req.events)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateWebhookResponse { webhook, secret }),
    ))
}

/// GET /v1/webhooks
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Webhook>>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.list_webhooks(&auth.tenant_id)?))
}

/// DELETE /v1/webhooks/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = resolve_bearer(&state, &headers)?;
    state.store.soft_delete_webhook(&id, &auth.tenant_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/webhooks/{id}/test: fire a signed ping at the receiver.
pub async fn test(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = resolve_bearer(&state, &headers)?;
    let webhook = state.store.get_webhook(&id, &auth.tenant_id)?;
    if !webhook.is_active {
        return Err(ApiError::NotFound("webhook not found".to_string()));
    }

    state.hooks.dispatch_to(
        webhook,
        EVENT_PING,
        serde_json::json!({
            "message": "minirag webhook test",
            "tenant_id": auth.tenant_id,
        }),
    );
    Ok(StatusCode::ACCEPTED)
}
