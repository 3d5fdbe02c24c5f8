use minirag_core::types::{AuthContext, Role};

use crate::error::{ApiError, ApiResult};

/// User and role management is admin territory.
pub fn require_admin(auth: &AuthContext) -> ApiResult<()> {
    if auth.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin role required".to_string()))
    }
}

/// Only the owner may touch owner accounts; whether the target already is
/// one or the change would mint one.
pub fn require_owner_for_owner_change(
    auth: &AuthContext,
    target_role: Role,
    new_role: Option<Role>,
) -> ApiResult<()> {
    let touches_owner = target_role == Role::Owner || new_role == Some(Role::Owner);
    if touches_owner && !auth.role.is_owner() {
        return Err(ApiError::Forbidden(
            "only the owner may change owner users".to_string(),
        ));
    }
    Ok(())
}

/// Cross-tenant reference check used before creation: the referenced entity
/// must exist under the caller's tenant. A miss reads as invalid input, not
/// a 404; the id belongs to someone else or to nobody.
pub fn cross_tenant_ref<T>(
    result: std::result::Result<T, minirag_store::StoreError>,
    what: &str,
) -> ApiResult<T> {
    result.map_err(|e| match e {
        minirag_store::StoreError::NotFound { .. } => {
            ApiError::InvalidInput(format!("{} does not exist in this tenant", what))
        }
        other => other.into(),
    })
}
