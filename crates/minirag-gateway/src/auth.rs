use axum::http::HeaderMap;
use minirag_core::types::AuthContext;
use tracing::debug;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolve the bearer credential to an `AuthContext`.
///
/// Dispatch rule: compact signed session tokens contain `.`; opaque API
/// tokens never do. Inactive users and disabled tenants fail closed either
/// way.
pub fn resolve_bearer(state: &AppState, headers: &HeaderMap) -> ApiResult<AuthContext> {
    let credential = extract_bearer(headers)
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer credential".to_string()))?;

    if credential.contains('.') {
        resolve_session(state, credential)
    } else {
        resolve_api_token(state, credential)
    }
}

fn resolve_session(state: &AppState, token: &str) -> ApiResult<AuthContext> {
    let claims = state.signer.verify(token)?;

    let user = state
        .store
        .get_user(&claims.sub, &claims.tenant_id)
        .map_err(|_| ApiError::Unauthenticated("invalid credentials".to_string()))?;
    if !user.is_active {
        return Err(ApiError::Unauthenticated("invalid credentials".to_string()));
    }
    ensure_tenant_active(state, &claims.tenant_id)?;

    debug!(user_id = %user.id, "session credential resolved");
    Ok(AuthContext {
        tenant_id: user.tenant_id,
        user_id: user.id,
        // The store is authoritative; the claim role is only a hint that can
        // go stale between signing and use.
        role: user.role,
    })
}

fn resolve_api_token(state: &AppState, token: &str) -> ApiResult<AuthContext> {
    let digest = minirag_crypto::hash_api_token(token);
    let api_token = state
        .store
        .find_live_token_by_hash(&digest)?
        .ok_or_else(|| ApiError::Unauthenticated("invalid credentials".to_string()))?;

    let user = state
        .store
        .get_user(&api_token.user_id, &api_token.tenant_id)
        .map_err(|_| ApiError::Unauthenticated("invalid credentials".to_string()))?;
    if !user.is_active {
        return Err(ApiError::Unauthenticated("invalid credentials".to_string()));
    }
    ensure_tenant_active(state, &api_token.tenant_id)?;

    state.store.touch_api_token(&api_token.id)?;

    debug!(user_id = %user.id, token_id = %api_token.id, "api token resolved");
    Ok(AuthContext {
        tenant_id: user.tenant_id,
        user_id: user.id,
        role: user.role,
    })
}

fn ensure_tenant_active(state: &AppState, tenant_id: &str) -> ApiResult<()> {
    let active = state
        .store
        .tenant_is_active(tenant_id)
        .map_err(|_| ApiError::Unauthenticated("invalid credentials".to_string()))?;
    if active {
        Ok(())
    } else {
        Err(ApiError::Unauthenticated("invalid credentials".to_string()))
    }
}
