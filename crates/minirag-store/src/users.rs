use minirag_core::types::{new_id, now_ts, Role};
use rusqlite::params;

use crate::error::{is_unique_violation, Result, StoreError};
use crate::store::MetaStore;
use crate::types::User;

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    use std::str::FromStr;
    let role = Role::from_str(&row.get::<_, String>(4)?).unwrap_or_default();
    Ok(User {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const USER_COLS: &str =
    "id, tenant_id, email, password_hash, role, is_active, created_at, updated_at";

/// Mutable fields for `update_user`. `None` leaves the column untouched.
#[derive(Debug, Default)]
pub struct UserPatch {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password_hash: Option<String>,
}

impl MetaStore {
    pub fn create_user(
        &self,
        tenant_id: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();

        conn.execute(
            "INSERT INTO users (id, tenant_id, email, password_hash, role, is_active,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![id, tenant_id, email, password_hash, role.to_string(), now],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("user '{}' already exists in tenant", email))
            } else {
                e.into()
            }
        })?;

        Ok(User {
            id,
            tenant_id: tenant_id.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_user(&self, id: &str, tenant_id: &str) -> Result<User> {
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM users WHERE id = ?1 AND tenant_id = ?2",
                USER_COLS
            ),
            params![id, tenant_id],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("user"),
            other => other.into(),
        })
    }

    /// Login lookup. Returns every active user holding this address; one
    /// per tenant at most; the caller disambiguates with a tenant slug when
    /// more than one matches.
    pub fn find_users_by_email(&self, email: &str) -> Result<Vec<User>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE email = ?1 AND is_active = 1",
            USER_COLS
        ))?;
        let users = stmt
            .query_map(params![email], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn list_users(&self, tenant_id: &str, limit: u32, offset: u32) -> Result<Vec<User>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users
             WHERE tenant_id = ?1 AND is_active = 1
             ORDER BY created_at LIMIT ?2 OFFSET ?3",
            USER_COLS
        ))?;
        let users = stmt
            .query_map(params![tenant_id, limit, offset], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn update_user(&self, id: &str, tenant_id: &str, patch: UserPatch) -> Result<User> {
        {
            let conn = self.lock();
            let now = now_ts();
            let n = conn.execute(
                "UPDATE users SET
                    role          = COALESCE(?3, role),
                    is_active     = COALESCE(?4, is_active),
                    password_hash = COALESCE(?5, password_hash),
                    updated_at    = ?6
                 WHERE id = ?1 AND tenant_id = ?2",
                params![
                    id,
                    tenant_id,
                    patch.role.map(|r| r.to_string()),
                    patch.is_active.map(|b| b as i32),
                    patch.password_hash,
                    now
                ],
            )?;
            if n == 0 {
                return Err(StoreError::not_found("user"));
            }
        }
        self.get_user(id, tenant_id)
    }

    pub fn soft_delete_user(&self, id: &str, tenant_id: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE users SET is_active = 0, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, now_ts()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("user"));
        }
        Ok(())
    }
}
