use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use minirag_core::types::Role;
use minirag_store::types::User;
use minirag_store::users::UserPatch;

use crate::admission::{require_admin, require_owner_for_owner_change};
use crate::app::AppState;
use crate::auth::resolve_bearer;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub password: Option<String>,
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

/// POST /v1/users (admin+; minting an owner needs the owner)
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let auth = resolve_bearer(&state, &headers)?;
    require_admin(&auth)?;

    let role = req.role.unwrap_or(Role::Member);
    require_owner_for_owner_change(&auth, Role::Member, Some(role))?;

    if !req.email.contains('@') {
        return Err(ApiError::InvalidInput("email is not an email".to_string()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::InvalidInput(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = minirag_crypto::hash_password(&req.password)
        .map_err(|_| ApiError::Internal("password hashing failed".to_string()))?;
    let user = state
        .store
        .create_user(&auth.tenant_id, &req.email, &password_hash, role)?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /v1/users (admin+)
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let auth = resolve_bearer(&state, &headers)?;
    require_admin(&auth)?;
    Ok(Json(state.store.list_users(
        &auth.tenant_id,
        query.limit.min(200),
        query.offset,
    )?))
}

/// GET /v1/users/{id} (admin+)
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<User>> {
    let auth = resolve_bearer(&state, &headers)?;
    require_admin(&auth)?;
    Ok(Json(state.store.get_user(&id, &auth.tenant_id)?))
}

/// PATCH /v1/users/{id} (admin+; touching owners needs the owner)
pub async fn update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    let auth = resolve_bearer(&state, &headers)?;
    require_admin(&auth)?;

    let target = state.store.get_user(&id, &auth.tenant_id)?;
    require_owner_for_owner_change(&auth, target.role, req.role)?;

    let password_hash = match &req.password {
        Some(password) if password.len() < 8 => {
            return Err(ApiError::InvalidInput(
                "password must be at least 8 characters".to_string(),
            ))
        }
        Some(password) => Some(
            minirag_crypto::hash_password(password)
                .map_err(|_| ApiError::Internal("password hashing failed".to_string()))?,
        ),
        None => None,
    };

    let user = state.store.update_user(
        &id,
        &auth.tenant_id,
        UserPatch {
            role: req.role,
            is_active: req.is_active,
            password_hash,
        },
    )?;
    Ok(Json(user))
}

/// DELETE /v1/users/{id} (admin+; owners only removable by the owner)
pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let auth = resolve_bearer(&state, &headers)?;
    require_admin(&auth)?;

    let target = state.store.get_user(&id, &auth.tenant_id)?;
    require_owner_for_owner_change(&auth, target.role, None)?;
    if target.id == auth.user_id {
        return Err(ApiError::InvalidInput(
            "cannot deactivate your own account".to_string(),
        ));
    }

    state.store.soft_delete_user(&id, &auth.tenant_id)?;
    Ok(StatusCode::NO_CONTENT)
}
