use minirag_core::types::{new_id, now_ts};
use rusqlite::params;

use crate::error::{is_unique_violation, Result, StoreError};
use crate::store::MetaStore;
use crate::types::Tenant;

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        plan: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const TENANT_COLS: &str = "id, name, slug, plan, status, created_at, updated_at";

impl MetaStore {
    pub fn create_tenant(&self, name: &str, slug: &str, plan: &str) -> Result<Tenant> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();

        conn.execute(
            "INSERT INTO tenants (id, name, slug, plan, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)",
            params![id, name, slug, plan, now],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("tenant slug '{}' already exists", slug))
            } else {
                e.into()
            }
        })?;

        Ok(Tenant {
            id,
            name: name.to_string(),
            slug: slug.to_string(),
            plan: plan.to_string(),
            status: "active".to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_tenant(&self, id: &str) -> Result<Tenant> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {} FROM tenants WHERE id = ?1", TENANT_COLS),
            params![id],
            row_to_tenant,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("tenant"),
            other => other.into(),
        })
    }

    /// Active means not soft-disabled; disabled tenants fail auth closed.
    pub fn tenant_is_active(&self, id: &str) -> Result<bool> {
        Ok(self.get_tenant(id)?.status == "active")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get() {
        let store = MetaStore::open_in_memory().unwrap();
        let t = store.create_tenant("Acme", "acme", "free").unwrap();
        let loaded = store.get_tenant(&t.id).unwrap();
        assert_eq!(loaded.slug, "acme");
        assert_eq!(loaded.status, "active");
        assert!(store.tenant_is_active(&t.id).unwrap());
    }

    #[test]
    fn duplicate_slug_conflicts() {
        let store = MetaStore::open_in_memory().unwrap();
        store.create_tenant("Acme", "acme", "free").unwrap();
        let err = store.create_tenant("Other", "acme", "free").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn missing_tenant_not_found() {
        let store = MetaStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get_tenant("nope").unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }
}
