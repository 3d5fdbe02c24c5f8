use minirag_core::types::{new_id, now_ts};
use rusqlite::params;

use crate::error::{Result, StoreError};
use crate::store::MetaStore;
use crate::types::ApiToken;

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiToken> {
    Ok(ApiToken {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        user_id: row.get(2)?,
        name: row.get(3)?,
        token_hash: row.get(4)?,
        last_used_at: row.get(5)?,
        revoked_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

const TOKEN_COLS: &str =
    "id, tenant_id, user_id, name, token_hash, last_used_at, revoked_at, created_at, updated_at";

impl MetaStore {
    pub fn create_api_token(
        &self,
        tenant_id: &str,
        user_id: &str,
        name: &str,
        token_hash: &str,
    ) -> Result<ApiToken> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();

        conn.execute(
            "INSERT INTO api_tokens (id, tenant_id, user_id, name, token_hash,
                                     created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, tenant_id, user_id, name, token_hash, now],
        )?;

        Ok(ApiToken {
            id,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            token_hash: token_hash.to_string(),
            last_used_at: None,
            revoked_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Auth hot path: one indexed lookup by digest, revoked rows excluded at
    /// the SQL level so a revoked token can never authenticate.
    pub fn find_live_token_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>> {
        let conn = self.lock();
        let token = conn
            .query_row(
                &format!(
                    "SELECT {} FROM api_tokens
                     WHERE token_hash = ?1 AND revoked_at IS NULL",
                    TOKEN_COLS
                ),
                params![token_hash],
                row_to_token,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(token)
    }

    pub fn touch_api_token(&self, id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE api_tokens SET last_used_at = ?2 WHERE id = ?1",
            params![id, now_ts()],
        )?;
        Ok(())
    }

    pub fn list_api_tokens(&self, tenant_id: &str) -> Result<Vec<ApiToken>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM api_tokens
             WHERE tenant_id = ?1 AND revoked_at IS NULL
             ORDER BY created_at",
            TOKEN_COLS
        ))?;
        let tokens = stmt
            .query_map(params![tenant_id], row_to_token)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tokens)
    }

    pub fn revoke_api_token(&self, id: &str, tenant_id: &str) -> Result<()> {
        let conn = self.lock();
        let now = now_ts();
        let n = conn.execute(
            "UPDATE api_tokens SET revoked_at = ?3, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2 AND revoked_at IS NULL",
            params![id, tenant_id, now],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("api token"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirag_core::types::Role;

    fn fixture() -> (MetaStore, String, String) {
        let store = MetaStore::open_in_memory().unwrap();
        let t = store.create_tenant("Acme", "acme", "free").unwrap();
        let u = store.create_user(&t.id, "a@x.com", "h", Role::Owner).unwrap();
        (store, t.id, u.id)
    }

    #[test]
    fn lookup_by_hash() {
        let (store, tid, uid) = fixture();
        let created = store.create_api_token(&tid, &uid, "ci", "digest-1").unwrap();
        let found = store.find_live_token_by_hash("digest-1").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(store.find_live_token_by_hash("digest-2").unwrap().is_none());
    }

    #[test]
    fn revoked_token_never_resolves() {
        let (store, tid, uid) = fixture();
        let created = store.create_api_token(&tid, &uid, "ci", "digest-1").unwrap();
        store.revoke_api_token(&created.id, &tid).unwrap();
        assert!(store.find_live_token_by_hash("digest-1").unwrap().is_none());
        assert!(store.list_api_tokens(&tid).unwrap().is_empty());
        // Double revoke reports not found.
        assert!(store.revoke_api_token(&created.id, &tid).is_err());
    }

    #[test]
    fn touch_updates_last_used() {
        let (store, tid, uid) = fixture();
        let created = store.create_api_token(&tid, &uid, "ci", "digest-1").unwrap();
        assert!(created.last_used_at.is_none());
        store.touch_api_token(&created.id).unwrap();
        let found = store.find_live_token_by_hash("digest-1").unwrap().unwrap();
        assert!(found.last_used_at.is_some());
    }
}
