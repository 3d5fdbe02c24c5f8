use minirag_core::types::{new_id, now_ts};
use rusqlite::params;

use crate::error::{Result, StoreError};
use crate::store::MetaStore;
use crate::types::BotProfile;

fn row_to_bot(row: &rusqlite::Row<'_>) -> rusqlite::Result<BotProfile> {
    Ok(BotProfile {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        model: row.get(3)?,
        system_prompt: row.get(4)?,
        temperature: row.get(5)?,
        max_tokens: row.get(6)?,
        encrypted_credentials: row.get(7)?,
        is_active: row.get::<_, i32>(8)? != 0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const BOT_COLS: &str = "id, tenant_id, name, model, system_prompt, temperature, max_tokens, \
                        encrypted_credentials, is_active, created_at, updated_at";

#[derive(Debug, Default)]
pub struct BotPatch {
    pub name: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// `Some(None)` clears stored credentials; `Some(Some(v))` replaces them.
    pub encrypted_credentials: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl MetaStore {
    #[allow(clippy::too_many_arguments)]
    pub fn create_bot_profile(
        &self,
        tenant_id: &str,
        name: &str,
        model: &str,
        system_prompt: &str,
        temperature: f64,
        max_tokens: u32,
        encrypted_credentials: Option<&str>,
    ) -> Result<BotProfile> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();

        conn.execute(
            "INSERT INTO bot_profiles (id, tenant_id, name, model, system_prompt,
                                       temperature, max_tokens, encrypted_credentials,
                                       is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)",
            params![
                id,
                tenant_id,
                name,
                model,
                system_prompt,
                temperature,
                max_tokens,
                encrypted_credentials,
                now
            ],
        )?;

        Ok(BotProfile {
            id,
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            temperature,
            max_tokens,
            encrypted_credentials: encrypted_credentials.map(String::from),
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_bot_profile(&self, id: &str, tenant_id: &str) -> Result<BotProfile> {
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM bot_profiles WHERE id = ?1 AND tenant_id = ?2",
                BOT_COLS
            ),
            params![id, tenant_id],
            row_to_bot,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("bot profile"),
            other => other.into(),
        })
    }

    pub fn list_bot_profiles(
        &self,
        tenant_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<BotProfile>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bot_profiles
             WHERE tenant_id = ?1 AND is_active = 1
             ORDER BY created_at LIMIT ?2 OFFSET ?3",
            BOT_COLS
        ))?;
        let bots = stmt
            .query_map(params![tenant_id, limit, offset], row_to_bot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bots)
    }

    pub fn update_bot_profile(
        &self,
        id: &str,
        tenant_id: &str,
        patch: BotPatch,
    ) -> Result<BotProfile> {
        {
            let conn = self.lock();
            let now = now_ts();

            // encrypted_credentials distinguishes "leave alone" from "clear",
            // so it can't ride the COALESCE pattern used for the others.
            if let Some(creds) = &patch.encrypted_credentials {
                conn.execute(
                    "UPDATE bot_profiles SET encrypted_credentials = ?3, updated_at = ?4
                     WHERE id = ?1 AND tenant_id = ?2",
                    params![id, tenant_id, creds, now],
                )?;
            }

            let n = conn.execute(
                "UPDATE bot_profiles SET
                    name          = COALESCE(?3, name),
                    model         = COALESCE(?4, model),
                    system_prompt = COALESCE(?5, system_prompt),
                    temperature   = COALESCE(?6, temperature),
                    max_tokens    = COALESCE(?7, max_tokens),
                    is_active     = COALESCE(?8, is_active),
                    updated_at    = ?9
                 WHERE id = ?1 AND tenant_id = ?2",
                params![
                    id,
                    tenant_id,
                    patch.name,
                    patch.model,
                    patch.system_prompt,
                    patch.temperature,
                    patch.max_tokens,
                    patch.is_active.map(|b| b as i32),
                    now
                ],
            )?;
            if n == 0 {
                return Err(StoreError::not_found("bot profile"));
            }
        }
        self.get_bot_profile(id, tenant_id)
    }

    pub fn soft_delete_bot_profile(&self, id: &str, tenant_id: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE bot_profiles SET is_active = 0, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, now_ts()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("bot profile"));
        }
        Ok(())
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

    fn make_bot(store: &MetaStore, tid: &str) -> BotProfile {
        store
            .create_bot_profile(tid, "support", "gpt-4o-mini", "You are helpful.", 0.7, 1024, None)
            .unwrap()
    }

    #[test]
    fn crud_round_trip() {
        let (store, tid) = fixture();
        let bot = make_bot(&store, &tid);
        assert_eq!(store.get_bot_profile(&bot.id, &tid).unwrap().name, "support");

        let updated = store
            .update_bot_profile(
                &bot.id,
                &tid,
                BotPatch {
                    system_prompt: Some("Be terse.".into()),
                    temperature: Some(0.2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.system_prompt, "Be terse.");
        assert_eq!(updated.temperature, 0.2);
        assert_eq!(updated.model, "gpt-4o-mini");

        store.soft_delete_bot_profile(&bot.id, &tid).unwrap();
        assert!(store.list_bot_profiles(&tid, 50, 0).unwrap().is_empty());
    }

    #[test]
    fn credentials_set_and_clear() {
        let (store, tid) = fixture();
        let bot = make_bot(&store, &tid);

        let with_creds = store
            .update_bot_profile(
                &bot.id,
                &tid,
                BotPatch {
                    encrypted_credentials: Some(Some("enc:abc".into())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(with_creds.encrypted_credentials.as_deref(), Some("enc:abc"));

        let cleared = store
            .update_bot_profile(
                &bot.id,
                &tid,
                BotPatch {
                    encrypted_credentials: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cleared.encrypted_credentials.is_none());
    }

    #[test]
    fn cross_tenant_get_fails() {
        let (store, tid) = fixture();
        let other = store.create_tenant("Beta", "beta", "free").unwrap();
        let bot = make_bot(&store, &tid);
        assert!(store.get_bot_profile(&bot.id, &other.id).is_err());
    }
}
