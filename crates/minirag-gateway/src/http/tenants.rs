use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use minirag_core::types::Role;
use minirag_store::types::{ApiToken, Tenant, User};

use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct BootstrapRequest {
    pub tenant_slug: String,
    #[serde(default)]
    pub tenant_name: Option<String>,
    pub owner_email: String,
    pub owner_password: String,
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Serialize)]
pub struct BootstrapResponse {
    pub tenant: Tenant,
    pub user: User,
    /// Shown exactly once; only its digest is stored.
    pub api_token: String,
    pub token: ApiToken,
}

/// POST /v1/tenants: the only unauthenticated mutation: create a tenant,
/// its owner account, and a first API token.
pub async fn bootstrap(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BootstrapRequest>,
) -> ApiResult<(StatusCode, Json<BootstrapResponse>)> {
    let slug = req.tenant_slug.trim().to_ascii_lowercase();
    if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ApiError::InvalidInput(
            "tenant_slug must be non-empty, alphanumeric or '-'".to_string(),
        ));
    }
    if !req.owner_email.contains('@') {
        return Err(ApiError::InvalidInput("owner_email is not an email".to_string()));
    }
    if req.owner_password.len() < 8 {
        return Err(ApiError::InvalidInput(
            "owner_password must be at least 8 characters".to_string(),
        ));
    }

    let name = req.tenant_name.unwrap_or_else(|| slug.clone());
    let plan = req.plan.as_deref().unwrap_or("free");
    let tenant = state.store.create_tenant(&name, &slug, plan)?;

    let password_hash = minirag_crypto::hash_password(&req.owner_password)
        .map_err(|_| ApiError::Internal("password hashing failed".to_string()))?;
    let user = state
        .store
        .create_user(&tenant.id, &req.owner_email, &password_hash, Role::Owner)?;

    let raw_token = minirag_crypto::generate_secret("mrk_");
    let token = state.store.create_api_token(
        &tenant.id,
        &user.id,
        "bootstrap",
        &minirag_crypto::hash_api_token(&raw_token),
    )?;

    info!(tenant_id = %tenant.id, slug = %tenant.slug, "tenant bootstrapped");

    Ok((
        StatusCode::CREATED,
        Json(BootstrapResponse {
            tenant,
            user,
            api_token: raw_token,
            token,
        }),
    ))
}

/// GET /v1/tenants/me
pub async fn current_tenant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Tenant>> {
    let auth = resolve_bearer(&state, &headers)?;
    Ok(Json(state.store.get_tenant(&auth.tenant_id)?))
}
