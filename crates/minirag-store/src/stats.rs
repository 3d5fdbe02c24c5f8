use rusqlite::params;
use serde::Serialize;

use crate::error::Result;
use crate::store::MetaStore;

#[derive(Debug, Clone, Serialize)]
pub struct StatsOverview {
    pub bot_count: u32,
    pub source_count: u32,
    pub chunk_count: u32,
    pub chat_count: u32,
    pub message_count: u32,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayUsage {
    pub day: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub events: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelUsage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackStats {
    pub positive: u32,
    pub negative: u32,
}

impl MetaStore {
    pub fn stats_overview(&self, tenant_id: &str) -> Result<StatsOverview> {
        let conn = self.lock();
        let count = |sql: &str| -> rusqlite::Result<u32> {
            conn.query_row(sql, params![tenant_id], |row| row.get(0))
        };

        let bot_count =
            count("SELECT COUNT(*) FROM bot_profiles WHERE tenant_id = ?1 AND is_active = 1")?;
        let source_count =
            count("SELECT COUNT(*) FROM sources WHERE tenant_id = ?1 AND is_active = 1")?;
        let chunk_count = count("SELECT COUNT(*) FROM chunks WHERE tenant_id = ?1")?;
        let chat_count = count("SELECT COUNT(*) FROM chats WHERE tenant_id = ?1")?;
        let message_count = count("SELECT COUNT(*) FROM messages WHERE tenant_id = ?1")?;

        let (total_prompt_tokens, total_completion_tokens) = conn.query_row(
            "SELECT COALESCE(SUM(total_prompt_tokens), 0),
                    COALESCE(SUM(total_completion_tokens), 0)
             FROM chats WHERE tenant_id = ?1",
            params![tenant_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StatsOverview {
            bot_count,
            source_count,
            chunk_count,
            chat_count,
            message_count,
            total_prompt_tokens,
            total_completion_tokens,
        })
    }

    pub fn usage_by_day(&self, tenant_id: &str, days: u32) -> Result<Vec<DayUsage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT date(created_at) AS day,
                    COALESCE(SUM(prompt_tokens), 0),
                    COALESCE(SUM(completion_tokens), 0),
                    COUNT(*)
             FROM usage_events
             WHERE tenant_id = ?1 AND datetime(created_at) >= datetime('now', ?2)
             GROUP BY day ORDER BY day",
        )?;
        let window = format!("-{} days", days);
        let rows = stmt
            .query_map(params![tenant_id, window], |row| {
                Ok(DayUsage {
                    day: row.get(0)?,
                    prompt_tokens: row.get(1)?,
                    completion_tokens: row.get(2)?,
                    events: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn usage_by_model(&self, tenant_id: &str) -> Result<Vec<ModelUsage>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT model,
                    COALESCE(SUM(prompt_tokens), 0),
                    COALESCE(SUM(completion_tokens), 0)
             FROM usage_events
             WHERE tenant_id = ?1
             GROUP BY model ORDER BY model",
        )?;
        let rows = stmt
            .query_map(params![tenant_id], |row| {
                Ok(ModelUsage {
                    model: row.get(0)?,
                    prompt_tokens: row.get(1)?,
                    completion_tokens: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn feedback_counts(&self, tenant_id: &str) -> Result<FeedbackStats> {
        let conn = self.lock();
        let (positive, negative) = conn.query_row(
            "SELECT COALESCE(SUM(feedback = 'positive'), 0),
                    COALESCE(SUM(feedback = 'negative'), 0)
             FROM messages WHERE tenant_id = ?1",
            params![tenant_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(FeedbackStats { positive, negative })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::{NewMessage, NewUsageEvent};
    use crate::types::MessageRole;

    #[test]
    fn overview_and_feedback_are_tenant_scoped() {
        let store = MetaStore::open_in_memory().unwrap();
        let t1 = store.create_tenant("Acme", "acme", "free").unwrap();
        let t2 = store.create_tenant("Beta", "beta", "free").unwrap();
        let u = store
            .create_user(&t1.id, "a@x.com", "h", minirag_core::types::Role::Owner)
            .unwrap();
        let bot = store
            .create_bot_profile(&t1.id, "b", "gpt-4o-mini", "", 0.7, 256, None)
            .unwrap();
        let chat = store.create_chat(&t1.id, &bot.id, &u.id, "t").unwrap();
        let msg = store
            .append_message(
                &chat.id,
                &t1.id,
                MessageRole::Assistant,
                NewMessage {
                    content: "hi".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .set_message_feedback(&chat.id, &msg.id, &t1.id, Some("positive"))
            .unwrap();
        store
            .record_usage(
                &t1.id,
                NewUsageEvent {
                    chat_id: chat.id.clone(),
                    message_id: msg.id.clone(),
                    model: "gpt-4o-mini".into(),
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    is_stream: false,
                    time_to_first_token_ms: None,
                    stream_duration_ms: None,
                },
            )
            .unwrap();

        let s1 = store.stats_overview(&t1.id).unwrap();
        assert_eq!(s1.bot_count, 1);
        assert_eq!(s1.chat_count, 1);
        assert_eq!(s1.total_prompt_tokens, 10);

        let s2 = store.stats_overview(&t2.id).unwrap();
        assert_eq!(s2.bot_count, 0);
        assert_eq!(s2.total_prompt_tokens, 0);

        let fb = store.feedback_counts(&t1.id).unwrap();
        assert_eq!(fb.positive, 1);
        assert_eq!(fb.negative, 0);

        let by_model = store.usage_by_model(&t1.id).unwrap();
        assert_eq!(by_model.len(), 1);
        assert_eq!(by_model[0].model, "gpt-4o-mini");

        let by_day = store.usage_by_day(&t1.id, 7).unwrap();
        assert_eq!(by_day.len(), 1);
        assert_eq!(by_day[0].prompt_tokens, 10);
    }
}
