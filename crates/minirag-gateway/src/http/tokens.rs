use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use minirag_store::types::ApiToken;

use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct CreateTokenResponse {
    /// Shown exactly once; only its digest is stored.
    pub api_token: String,
    pub token: ApiToken,
}

/// POST /v1/api-tokens
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTokenRequest>,
) -> ApiResult<(StatusCode, Json<CreateTokenResponse>)> {
    let auth = resolve_bearer(&state, &headers)?;
    if req.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("name must not be empty".to_string()));
    }

    let raw_token = minirag_crypto::generate_secret("mrk_");
    let token = state.store.create_api_token(
        &auth.tenant_id,
        &auth.user_id,
        req.name.trim(),
        &minirag_crypto::hash_api_token(&raw_token),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            api_token: raw_token,
            token,
        }),
    ))
}

/// GET /v1/api-tokens
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ApiToken>>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.list_api_tokens(&auth.tenant_id)?))
}

/// DELETE /v1/api-tokens/{id}: revoke; the plaintext never works again.
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = resolve_bearer(&state, &headers)?;
    state.store.revoke_api_token(&id, &auth.tenant_id)?;
    Ok(StatusCode::NO_CONTENT)
}
