use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use minirag_store::types::{Tenant, User};

use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Required only when the address exists in more than one tenant.
    #[serde(default)]
    pub tenant_slug: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in_minutes: u64,
    pub user: User,
    pub tenant: Tenant,
}

/// POST /v1/auth/login: email + password → signed session token.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let candidates = state.store.find_users_by_email(&req.email)?;

    // Narrow to one account, by slug when the address spans tenants.
    let mut matched: Vec<(User, Tenant)> = Vec::new();
    for user in candidates {
        let tenant = state.store.get_tenant(&user.tenant_id)?;
        if let Some(slug) = &req.tenant_slug {
            if &tenant.slug != slug {
                continue;
            }
        }
        matched.push((user, tenant));
    }

    if matched.len() > 1 {
        return Err(ApiError::InvalidInput(
            "email exists in multiple tenants; pass tenant_slug".to_string(),
        ));
    }
    let Some((user, tenant)) = matched.pop() else {
        return Err(ApiError::Unauthenticated("invalid credentials".to_string()));
    };

    if !minirag_crypto::verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::Unauthenticated("invalid credentials".to_string()));
    }
    if tenant.status != "active" {
        return Err(ApiError::Unauthenticated("invalid credentials".to_string()));
    }

    let token = state
        .signer
        .sign(&user.id, &user.tenant_id, &user.role.to_string())
        .map_err(|_| ApiError::Internal("session signing failed".to_string()))?;

    info!(user_id = %user.id, tenant_id = %user.tenant_id, "login succeeded");

    Ok(Json(LoginResponse {
        token,
        token_type: "bearer",
        expires_in_minutes: state.config.security.session_expire_minutes,
        user,
        tenant,
    }))
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: User,
    pub tenant: Tenant,
}

/// GET /v1/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<MeResponse>> {
    let auth = resolve_bearer(&state, &headers)?;
    let user = state.store.get_user(&auth.user_id, &auth.tenant_id)?;
    let tenant = state.store.get_tenant(&auth.tenant_id)?;
    Ok(Json(MeResponse { user, tenant }))
}
