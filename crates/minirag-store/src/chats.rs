use minirag_core::types::{new_id, now_ts};
use rusqlite::params;

use crate::error::{Result, StoreError};
use crate::store::MetaStore;
use crate::types::{Chat, Message, MessageRole, UsageEvent};

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        bot_profile_id: row.get(2)?,
        user_id: row.get(3)?,
        title: row.get(4)?,
        total_prompt_tokens: row.get(5)?,
        total_completion_tokens: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    use std::str::FromStr;
    let role = MessageRole::from_str(&row.get::<_, String>(3)?).unwrap_or(MessageRole::User);
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        tenant_id: row.get(2)?,
        role,
        content: row.get(4)?,
        context_chunks: row.get(5)?,
        feedback: row.get(6)?,
        prompt_tokens: row.get(7)?,
        completion_tokens: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const CHAT_COLS: &str = "id, tenant_id, bot_profile_id, user_id, title, total_prompt_tokens, \
                         total_completion_tokens, created_at, updated_at";

const MESSAGE_COLS: &str = "id, chat_id, tenant_id, role, content, context_chunks, feedback, \
                            prompt_tokens, completion_tokens, created_at, updated_at";

/// Fields for a message insert. Token counters stay zero for user messages.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub content: String,
    pub context_chunks: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct NewUsageEvent {
    pub chat_id: String,
    pub message_id: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub is_stream: bool,
    pub time_to_first_token_ms: Option<u64>,
    pub stream_duration_ms: Option<u64>,
}

impl MetaStore {
    pub fn create_chat(
        &self,
        tenant_id: &str,
        bot_profile_id: &str,
        user_id: &str,
        title: &str,
    ) -> Result<Chat> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();

        conn.execute(
            "INSERT INTO chats (id, tenant_id, bot_profile_id, user_id, title,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, tenant_id, bot_profile_id, user_id, title, now],
        )?;

        Ok(Chat {
            id,
            tenant_id: tenant_id.to_string(),
            bot_profile_id: bot_profile_id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_chat(&self, id: &str, tenant_id: &str) -> Result<Chat> {
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM chats WHERE id = ?1 AND tenant_id = ?2",
                CHAT_COLS
            ),
            params![id, tenant_id],
            row_to_chat,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("chat"),
            other => other.into(),
        })
    }

    pub fn list_chats(&self, tenant_id: &str, limit: u32, offset: u32) -> Result<Vec<Chat>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chats WHERE tenant_id = ?1
             ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3",
            CHAT_COLS
        ))?;
        let chats = stmt
            .query_map(params![tenant_id, limit, offset], row_to_chat)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chats)
    }

    pub fn append_message(
        &self,
        chat_id: &str,
        tenant_id: &str,
        role: MessageRole,
        msg: NewMessage,
    ) -> Result<Message> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();

        conn.execute(
            "INSERT INTO messages (id, chat_id, tenant_id, role, content, context_chunks,
                                   prompt_tokens, completion_tokens, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                chat_id,
                tenant_id,
                role.to_string(),
                msg.content,
                msg.context_chunks,
                msg.prompt_tokens,
                msg.completion_tokens,
                now
            ],
        )?;
        conn.execute(
            "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
            params![chat_id, now],
        )?;

        Ok(Message {
            id,
            chat_id: chat_id.to_string(),
            tenant_id: tenant_id.to_string(),
            role,
            content: msg.content,
            context_chunks: msg.context_chunks,
            feedback: None,
            prompt_tokens: msg.prompt_tokens,
            completion_tokens: msg.completion_tokens,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn list_messages(&self, chat_id: &str, tenant_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 AND tenant_id = ?2
             ORDER BY created_at",
            MESSAGE_COLS
        ))?;
        let messages = stmt
            .query_map(params![chat_id, tenant_id], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// The most recent `limit` messages, returned oldest-first for prompt
    /// assembly.
    pub fn recent_messages(
        &self,
        chat_id: &str,
        tenant_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM (
                 SELECT {} FROM messages
                 WHERE chat_id = ?1 AND tenant_id = ?2
                 ORDER BY created_at DESC LIMIT ?3
             ) ORDER BY created_at",
            MESSAGE_COLS, MESSAGE_COLS
        ))?;
        let messages = stmt
            .query_map(params![chat_id, tenant_id, limit], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn set_message_feedback(
        &self,
        chat_id: &str,
        message_id: &str,
        tenant_id: &str,
        feedback: Option<&str>,
    ) -> Result<Message> {
        {
            let conn = self.lock();
            let n = conn.execute(
                "UPDATE messages SET feedback = ?4, updated_at = ?5
                 WHERE id = ?1 AND chat_id = ?2 AND tenant_id = ?3",
                params![message_id, chat_id, tenant_id, feedback, now_ts()],
            )?;
            if n == 0 {
                return Err(StoreError::not_found("message"));
            }
        }
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM messages WHERE id = ?1 AND tenant_id = ?2",
                MESSAGE_COLS
            ),
            params![message_id, tenant_id],
            row_to_message,
        )
        .map_err(Into::into)
    }

    /// Record one LLM invocation and fold its tokens into the chat totals in
    /// the same transaction, keeping `sum(usage) == chat totals` exact.
    pub fn record_usage(&self, tenant_id: &str, event: NewUsageEvent) -> Result<UsageEvent> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let now = now_ts();
        let id = new_id();

        tx.execute(
            "INSERT INTO usage_events (id, tenant_id, chat_id, message_id, model,
                                       prompt_tokens, completion_tokens, is_stream,
                                       time_to_first_token_ms, stream_duration_ms,
                                       created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                id,
                tenant_id,
                event.chat_id,
                event.message_id,
                event.model,
                event.prompt_tokens,
                event.completion_tokens,
                event.is_stream as i32,
                event.time_to_first_token_ms,
                event.stream_duration_ms,
                now
            ],
        )?;
        tx.execute(
            "UPDATE chats SET total_prompt_tokens = total_prompt_tokens + ?3,
                              total_completion_tokens = total_completion_tokens + ?4,
                              updated_at = ?5
             WHERE id = ?1 AND tenant_id = ?2",
            params![
                event.chat_id,
                tenant_id,
                event.prompt_tokens,
                event.completion_tokens,
                now
            ],
        )?;
        tx.commit()?;

        Ok(UsageEvent {
            id,
            tenant_id: tenant_id.to_string(),
            chat_id: event.chat_id,
            message_id: event.message_id,
            model: event.model,
            prompt_tokens: event.prompt_tokens,
            completion_tokens: event.completion_tokens,
            is_stream: event.is_stream,
            time_to_first_token_ms: event.time_to_first_token_ms,
            stream_duration_ms: event.stream_duration_ms,
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (MetaStore, String, String, String) {
        let store = MetaStore::open_in_memory().unwrap();
        let t = store.create_tenant("Acme", "acme", "free").unwrap();
        let u = store
            .create_user(&t.id, "a@x.com", "h", minirag_core::types::Role::Owner)
            .unwrap();
        let bot = store
            .create_bot_profile(&t.id, "support", "gpt-4o-mini", "", 0.7, 1024, None)
            .unwrap();
        (store, t.id, u.id, bot.id)
    }

    #[test]
    fn message_order_is_chronological() {
        let (store, tid, uid, bid) = fixture();
        let chat = store.create_chat(&tid, &bid, &uid, "first").unwrap();

        for content in ["one", "two", "three"] {
            store
                .append_message(
                    &chat.id,
                    &tid,
                    MessageRole::User,
                    NewMessage {
                        content: content.into(),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let all = store.list_messages(&chat.id, &tid).unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);

        let recent = store.recent_messages(&chat.id, &tid, 2).unwrap();
        let recent_contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(recent_contents, ["two", "three"]);
    }

    #[test]
    fn usage_totals_stay_consistent() {
        let (store, tid, uid, bid) = fixture();
        let chat = store.create_chat(&tid, &bid, &uid, "t").unwrap();
        let msg = store
            .append_message(
                &chat.id,
                &tid,
                MessageRole::Assistant,
                NewMessage {
                    content: "hi".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        for (p, c) in [(100, 20), (50, 10)] {
            store
                .record_usage(
                    &tid,
                    NewUsageEvent {
                        chat_id: chat.id.clone(),
                        message_id: msg.id.clone(),
                        model: "gpt-4o-mini".into(),
                        prompt_tokens: p,
                        completion_tokens: c,
                        is_stream: false,
                        time_to_first_token_ms: None,
                        stream_duration_ms: None,
                    },
                )
                .unwrap();
        }

        let loaded = store.get_chat(&chat.id, &tid).unwrap();
        assert_eq!(loaded.total_prompt_tokens, 150);
        assert_eq!(loaded.total_completion_tokens, 30);
    }

    #[test]
    fn feedback_set_and_clear() {
        let (store, tid, uid, bid) = fixture();
        let chat = store.create_chat(&tid, &bid, &uid, "t").unwrap();
        let msg = store
            .append_message(
                &chat.id,
                &tid,
                MessageRole::Assistant,
                NewMessage {
                    content: "answer".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let up = store
            .set_message_feedback(&chat.id, &msg.id, &tid, Some("positive"))
            .unwrap();
        assert_eq!(up.feedback.as_deref(), Some("positive"));

        let cleared = store
            .set_message_feedback(&chat.id, &msg.id, &tid, None)
            .unwrap();
        assert!(cleared.feedback.is_none());
    }

    #[test]
    fn cross_tenant_chat_invisible() {
        let (store, tid, uid, bid) = fixture();
        let chat = store.create_chat(&tid, &bid, &uid, "t").unwrap();
        let other = store.create_tenant("Beta", "beta", "free").unwrap();
        assert!(store.get_chat(&chat.id, &other.id).is_err());
        assert!(store.list_chats(&other.id, 50, 0).unwrap().is_empty());
    }
}
