use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Mint a fresh 128-bit opaque identifier (UUIDv4, stored as TEXT).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC wall-clock as an RFC 3339 string; the storage format for
/// every `created_at` / `updated_at` column.
pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// User role hierarchy within a tenant: owner > admin > member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    #[default]
    Member,
}

impl Role {
    /// Owner and admin may manage users, tokens, and webhooks.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Role::Owner)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Admin => write!(f, "admin"),
            Role::Member => write!(f, "member"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The resolved identity behind a request. Every handler receives one and
/// must pass `tenant_id` into every query it issues.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub tenant_id: String,
    pub user_id: String,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trip() {
        for role in [Role::Owner, Role::Admin, Role::Member] {
            assert_eq!(Role::from_str(&role.to_string()).unwrap(), role);
        }
        assert!(Role::from_str("superuser").is_err());
    }

    #[test]
    fn admin_hierarchy() {
        assert!(Role::Owner.is_admin());
        assert!(Role::Admin.is_admin());
        assert!(!Role::Member.is_admin());
        assert!(Role::Owner.is_owner());
        assert!(!Role::Admin.is_owner());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
