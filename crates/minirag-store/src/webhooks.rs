use minirag_core::types::{new_id, now_ts};
use rusqlite::params;

use crate::error::{Result, StoreError};
use crate::store::MetaStore;
use crate::types::Webhook;

fn row_to_webhook(row: &rusqlite::Row<'_>) -> rusqlite::Result<Webhook> {
    let events: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default();
    Ok(Webhook {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        url: row.get(2)?,
        secret: row.get(3)?,
        events,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const WEBHOOK_COLS: &str = "id, tenant_id, url, secret, events, is_active, created_at, updated_at";

impl MetaStore {
    pub fn create_webhook(
        &self,
        tenant_id: &str,
        url: &str,
        secret: &str,
        events: &[String],
    ) -> Result<Webhook> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();
        let events_json = serde_json::to_string(events)?;

        conn.execute(
            "INSERT INTO webhooks (id, tenant_id, url, secret, events, is_active,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![id, tenant_id, url, secret, events_json, now],
        )?;

        Ok(Webhook {
            id,
            tenant_id: tenant_id.to_string(),
            url: url.to_string(),
            secret: secret.to_string(),
            events: events.to_vec(),
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_webhook(&self, id: &str, tenant_id: &str) -> Result<Webhook> {
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM webhooks WHERE id = ?1 AND tenant_id = ?2",
                WEBHOOK_COLS
            ),
            params![id, tenant_id],
            row_to_webhook,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("webhook"),
            other => other.into(),
        })
    }

    pub fn list_webhooks(&self, tenant_id: &str) -> Result<Vec<Webhook>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM webhooks
             WHERE tenant_id = ?1 AND is_active = 1
             ORDER BY created_at",
            WEBHOOK_COLS
        ))?;
        let hooks = stmt
            .query_map(params![tenant_id], row_to_webhook)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hooks)
    }

    pub fn soft_delete_webhook(&self, id: &str, tenant_id: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE webhooks SET is_active = 0, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, now_ts()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("webhook"));
        }
        Ok(())
    }

    /// Dispatcher query: active hooks of this tenant subscribed to `event`.
    /// Subscription filtering happens in Rust; the events column is a JSON
    /// array and the lists are tiny.
    pub fn webhooks_for_event(&self, tenant_id: &str, event: &str) -> Result<Vec<Webhook>> {
        Ok(self
            .list_webhooks(tenant_id)?
            .into_iter()
            .filter(|w| w.events.iter().any(|e| e == event))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (MetaStore, String) {
        let store = MetaStore::open_in_memory().unwrap();
        let t = store.create_tenant("Acme", "acme", "free").unwrap();
        (store, t.id)
    }

    #[test]
    fn event_subscription_filter() {
        let (store, tid) = fixture();
        store
            .create_webhook(
                &tid,
                "https://example.com/hook",
                "whs_1",
                &["source.ingested".into(), "source.failed".into()],
            )
            .unwrap();
        store
            .create_webhook(&tid, "https://example.com/chat", "whs_2", &["chat.message".into()])
            .unwrap();

        let hits = store.webhooks_for_event(&tid, "source.ingested").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://example.com/hook");
        assert!(store.webhooks_for_event(&tid, "nothing").unwrap().is_empty());
    }

    #[test]
    fn deleted_webhook_stops_receiving() {
        let (store, tid) = fixture();
        let hook = store
            .create_webhook(&tid, "https://example.com", "whs_1", &["chat.message".into()])
            .unwrap();
        store.soft_delete_webhook(&hook.id, &tid).unwrap();
        assert!(store.webhooks_for_event(&tid, "chat.message").unwrap().is_empty());
    }

    #[test]
    fn secret_not_serialized() {
        let (store, tid) = fixture();
        let hook = store
            .create_webhook(&tid, "https://example.com", "whs_secret", &[])
            .unwrap();
        let json = serde_json::to_string(&hook).unwrap();
        assert!(!json.contains("whs_secret"));
    }
}
