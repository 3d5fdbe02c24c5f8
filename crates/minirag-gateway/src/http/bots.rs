use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use minirag_store::bots::BotPatch;
use minirag_store::types::BotProfile;

use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Plain provider keys; sealed before they touch the database.
    #[serde(default)]
    pub credentials: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct UpdateBotRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// `null` clears stored credentials; an object replaces them; an absent
    /// field leaves them untouched.
    #[serde(default, deserialize_with = "double_option")]
    pub credentials: Option<Option<serde_json::Value>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Wraps a present field (including an explicit `null`) in `Some`, so the
/// PATCH body can distinguish "clear" from "leave alone".
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
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

fn validate_tuning(temperature: Option<f64>, max_tokens: Option<u32>) -> ApiResult<()> {
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ApiError::InvalidInput(
                "temperature must be within [0, 2]".to_string(),
            ));
        }
    }
    if let Some(m) = max_tokens {
        if m == 0 {
            return Err(ApiError::InvalidInput("max_tokens must be positive".to_string()));
        }
    }
    Ok(())
}

fn seal_credentials(
    state: &AppState,
    credentials: &serde_json::Value,
) -> ApiResult<String> {
    if !credentials.is_object() {
        return Err(ApiError::InvalidInput(
            "credentials must be a JSON object".to_string(),
        ));
    }
    let plain = serde_json::to_string(credentials)
        .map_err(|_| ApiError::InvalidInput("credentials are not serializable".to_string()))?;
    state
        .cipher
        .encrypt_value(&plain)
        .map_err(|_| ApiError::Internal("credential sealing failed".to_string()))
}

/// POST /v1/bot-profiles
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBotRequest>,
) -> ApiResult<(StatusCode, Json<BotProfile>)> {
    let auth = resolve_bearer(&state, &headers)?;
    if req.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("name must not be empty".to_string()));
    }
    validate_tuning(req.temperature, req.max_tokens)?;

    let sealed = match &req.credentials {
        Some(credentials) => Some(seal_credentials(&state, credentials)?),
        None => None,
    };

    let bot = state.store.create_bot_profile(
        &auth.tenant_id,
        req.name.trim(),
        req.model
            .as_deref()
            .unwrap_or(&state.config.models.default_llm_model),
        req.system_prompt.as_deref().unwrap_or(""),
        req.temperature.unwrap_or(0.7),
        req.max_tokens.unwrap_or(1024),
        sealed.as_deref(),
    )?;

    Ok((StatusCode::CREATED, Json(bot)))
}

/// GET /v1/bot-profiles
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<BotProfile>>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.list_bot_profiles(
        &auth.tenant_id,
        query.limit.min(200),
        query.offset,
    )?))
}

/// GET /v1/bot-profiles/{id}
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<BotProfile>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.get_bot_profile(&id, &auth.tenant_id)?))
}

/// PATCH /v1/bot-profiles/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateBotRequest>,
) -> ApiResult<Json<BotProfile>> {
    let auth = resolve_bearer(&state, &headers)?;
    validate_tuning(req.temperature, req.max_tokens)?;

    let encrypted_credentials = match req.credentials {
        None => None,
        Some(None) => Some(None),
        Some(Some(credentials)) => Some(Some(seal_credentials(&state, &credentials)?)),
    };

    let bot = state.store.update_bot_profile(
        &id,
        &auth.tenant_id,
        BotPatch {
            name: req.name,
            model: req.model,
            system_prompt: req.system_prompt,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            encrypted_credentials,
            is_active: req.is_active,
        },
    )?;
    Ok(Json(bot))
}

/// DELETE /v1/bot-profiles/{id}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = resolve_bearer(&state, &headers)?;
    state.store.soft_delete_bot_profile(&id, &auth.tenant_id)?;
    Ok(StatusCode::NO_CONTENT)
}
