use minirag_core::types::{new_id, now_ts};
use rusqlite::params;

use crate::error::{Result, StoreError};
use crate::store::MetaStore;
use crate::types::{Chunk, Document, NewChunk, RefreshSchedule, Source, SourceStatus, SourceType};

fn row_to_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Source> {
    use std::str::FromStr;
    let source_type =
        SourceType::from_str(&row.get::<_, String>(4)?).unwrap_or(SourceType::Text);
    let status = SourceStatus::from_str(&row.get::<_, String>(5)?).unwrap_or(SourceStatus::Pending);
    let refresh_schedule =
        RefreshSchedule::from_str(&row.get::<_, String>(9)?).unwrap_or_default();
    Ok(Source {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        bot_profile_id: row.get(2)?,
        parent_source_id: row.get(3)?,
        source_type,
        status,
        name: row.get(6)?,
        content: row.get(7)?,
        config: row.get(8)?,
        refresh_schedule,
        last_refreshed_at: row.get(10)?,
        last_error: row.get(11)?,
        document_count: row.get(12)?,
        chunk_count: row.get(13)?,
        is_active: row.get::<_, i32>(14)? != 0,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        document_id: row.get(2)?,
        source_id: row.get(3)?,
        bot_profile_id: row.get(4)?,
        ordinal: row.get(5)?,
        content: row.get(6)?,
        vector_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const SOURCE_COLS: &str = "id, tenant_id, bot_profile_id, parent_source_id, source_type, status, \
                           name, content, config, refresh_schedule, last_refreshed_at, \
                           last_error, document_count, chunk_count, is_active, created_at, \
                           updated_at";

const CHUNK_COLS: &str = "id, tenant_id, document_id, source_id, bot_profile_id, ordinal, \
                          content, vector_id, created_at, updated_at";

#[derive(Debug, Default)]
pub struct SourcePatch {
    pub name: Option<String>,
    pub content: Option<String>,
    pub config: Option<String>,
    pub refresh_schedule: Option<RefreshSchedule>,
    pub is_active: Option<bool>,
}

impl MetaStore {
    #[allow(clippy::too_many_arguments)]
    pub fn create_source(
        &self,
        tenant_id: &str,
        bot_profile_id: &str,
        parent_source_id: Option<&str>,
        source_type: SourceType,
        name: &str,
        content: &str,
        config: &str,
        refresh_schedule: RefreshSchedule,
    ) -> Result<Source> {
        let conn = self.lock();
        let now = now_ts();
        let id = new_id();

        conn.execute(
            "INSERT INTO sources (id, tenant_id, bot_profile_id, parent_source_id,
                                  source_type, status, name, content, config,
                                  refresh_schedule, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, 1, ?10, ?10)",
            params![
                id,
                tenant_id,
                bot_profile_id,
                parent_source_id,
                source_type.to_string(),
                name,
                content,
                config,
                refresh_schedule.to_string(),
                now
            ],
        )?;

        Ok(Source {
            id,
            tenant_id: tenant_id.to_string(),
            bot_profile_id: bot_profile_id.to_string(),
            parent_source_id: parent_source_id.map(String::from),
            source_type,
            status: SourceStatus::Pending,
            name: name.to_string(),
            content: content.to_string(),
            config: config.to_string(),
            refresh_schedule,
            last_refreshed_at: None,
            last_error: None,
            document_count: 0,
            chunk_count: 0,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_source(&self, id: &str, tenant_id: &str) -> Result<Source> {
        let conn = self.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM sources WHERE id = ?1 AND tenant_id = ?2",
                SOURCE_COLS
            ),
            params![id, tenant_id],
            row_to_source,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("source"),
            other => other.into(),
        })
    }

    pub fn list_sources(
        &self,
        tenant_id: &str,
        bot_profile_id: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Source>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sources
             WHERE tenant_id = ?1 AND is_active = 1
               AND (?2 IS NULL OR bot_profile_id = ?2)
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
            SOURCE_COLS
        ))?;
        let sources = stmt
            .query_map(params![tenant_id, bot_profile_id, limit, offset], row_to_source)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sources)
    }

    pub fn update_source(&self, id: &str, tenant_id: &str, patch: SourcePatch) -> Result<Source> {
        {
            let conn = self.lock();
            let n = conn.execute(
                "UPDATE sources SET
                    name             = COALESCE(?3, name),
                    content          = COALESCE(?4, content),
                    config           = COALESCE(?5, config),
                    refresh_schedule = COALESCE(?6, refresh_schedule),
                    is_active        = COALESCE(?7, is_active),
                    updated_at       = ?8
                 WHERE id = ?1 AND tenant_id = ?2",
                params![
                    id,
                    tenant_id,
                    patch.name,
                    patch.content,
                    patch.config,
                    patch.refresh_schedule.map(|r| r.to_string()),
                    patch.is_active.map(|b| b as i32),
                    now_ts()
                ],
            )?;
            if n == 0 {
                return Err(StoreError::not_found("source"));
            }
        }
        self.get_source(id, tenant_id)
    }

    pub fn soft_delete_source(&self, id: &str, tenant_id: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE sources SET is_active = 0, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, now_ts()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("source"));
        }
        Ok(())
    }

    /// Children of a batch parent; used for cycle prevention and listings.
    pub fn source_has_parent(&self, id: &str, tenant_id: &str) -> Result<bool> {
        Ok(self.get_source(id, tenant_id)?.parent_source_id.is_some())
    }

    /// Flip the source to `processing`, clearing the previous error in the
    /// same statement.
    pub fn begin_processing(&self, id: &str, tenant_id: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE sources SET status = 'processing', last_error = NULL, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, now_ts()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("source"));
        }
        Ok(())
    }

    /// Replace the source's document and chunk rows in one transaction.
    /// Prior rows from earlier runs are deleted in the same transaction that
    /// writes the new set, which is what makes re-runs and concurrent runs
    /// converge on the last committed state.
    pub fn commit_ingest(
        &self,
        source_id: &str,
        tenant_id: &str,
        bot_profile_id: &str,
        content: &str,
        chunks: &[NewChunk],
    ) -> Result<Document> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        let now = now_ts();

        tx.execute(
            "DELETE FROM chunks WHERE source_id = ?1 AND tenant_id = ?2",
            params![source_id, tenant_id],
        )?;
        tx.execute(
            "DELETE FROM documents WHERE source_id = ?1 AND tenant_id = ?2",
            params![source_id, tenant_id],
        )?;

        let document_id = new_id();
        let char_count = content.chars().count() as u32;
        tx.execute(
            "INSERT INTO documents (id, tenant_id, source_id, content, char_count,
                                    created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![document_id, tenant_id, source_id, content, char_count, now],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, tenant_id, document_id, source_id, bot_profile_id,
                                     ordinal, content, vector_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?1, ?8, ?8)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id,
                    tenant_id,
                    document_id,
                    source_id,
                    bot_profile_id,
                    chunk.ordinal,
                    chunk.content,
                    now
                ])?;
            }
        }

        tx.commit()?;

        Ok(Document {
            id: document_id,
            tenant_id: tenant_id.to_string(),
            source_id: source_id.to_string(),
            content: content.to_string(),
            char_count,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Success finalization: ready, counters, refresh watermark.
    pub fn finalize_ready(
        &self,
        id: &str,
        tenant_id: &str,
        document_count: u32,
        chunk_count: u32,
    ) -> Result<()> {
        let conn = self.lock();
        let now = now_ts();
        let n = conn.execute(
            "UPDATE sources SET status = 'ready', last_refreshed_at = ?3, last_error = NULL,
                                document_count = ?4, chunk_count = ?5, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, now, document_count, chunk_count],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("source"));
        }
        Ok(())
    }

    /// Failure finalization. Keeps the previous counters so operators can
    /// see what the last good run produced.
    pub fn finalize_error(&self, id: &str, tenant_id: &str, error: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE sources SET status = 'error', last_error = ?3, updated_at = ?4
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, error, now_ts()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("source"));
        }
        Ok(())
    }

    pub fn list_documents(&self, source_id: &str, tenant_id: &str) -> Result<Vec<Document>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, source_id, content, char_count, created_at, updated_at
             FROM documents WHERE source_id = ?1 AND tenant_id = ?2
             ORDER BY created_at",
        )?;
        let docs = stmt
            .query_map(params![source_id, tenant_id], |row| {
                Ok(Document {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    source_id: row.get(2)?,
                    content: row.get(3)?,
                    char_count: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    pub fn list_chunks_by_source(&self, source_id: &str, tenant_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE source_id = ?1 AND tenant_id = ?2 ORDER BY ordinal",
            CHUNK_COLS
        ))?;
        let chunks = stmt
            .query_map(params![source_id, tenant_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// Retrieval support: fetch chunk contents for search hits. The tenant
    /// filter runs again here even though the vector search was already
    /// filtered; both layers enforce isolation independently.
    pub fn get_chunks_by_ids(&self, tenant_id: &str, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM chunks WHERE tenant_id = ?1 AND id IN ({})",
            CHUNK_COLS, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bind: Vec<&dyn rusqlite::ToSql> = vec![&tenant_id];
        for id in ids {
            bind.push(id);
        }
        let chunks = stmt
            .query_map(bind.as_slice(), row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// Backfill helper: overwrite the refresh watermark directly. Used by
    /// operational tooling and tests to force or defer a refresh.
    pub fn set_last_refreshed_at(&self, id: &str, tenant_id: &str, ts: &str) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE sources SET last_refreshed_at = ?3, updated_at = ?4
             WHERE id = ?1 AND tenant_id = ?2",
            params![id, tenant_id, ts, now_ts()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("source"));
        }
        Ok(())
    }

    /// Refresh scheduler query: active, schedule set, not currently
    /// processing, and due per the schedule interval.
    pub fn eligible_refresh_sources(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id FROM sources
             WHERE refresh_schedule != 'none'
               AND is_active = 1
               AND status != 'processing'
               AND (last_refreshed_at IS NULL
                    OR datetime(last_refreshed_at,
                         CASE refresh_schedule
                            WHEN 'hourly' THEN '+1 hours'
                            WHEN 'daily'  THEN '+1 days'
                            WHEN 'weekly' THEN '+7 days'
                         END) <= datetime(?1))",
        )?;
        let rows = stmt
            .query_map(params![now_ts()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BotProfile;

    fn fixture() -> (MetaStore, String, BotProfile) {
        let store = MetaStore::open_in_memory().unwrap();
        let t = store.create_tenant("Acme", "acme", "free").unwrap();
        let bot = store
            .create_bot_profile(&t.id, "support", "gpt-4o-mini", "", 0.7, 1024, None)
            .unwrap();
        (store, t.id, bot)
    }

    fn make_source(store: &MetaStore, tid: &str, bot_id: &str) -> Source {
        store
            .create_source(
                tid,
                bot_id,
                None,
                SourceType::Text,
                "notes",
                "MiniRAG is a RAG platform.",
                "{}",
                RefreshSchedule::None,
            )
            .unwrap()
    }

    fn chunk(id: &str, ordinal: u32, content: &str) -> NewChunk {
        NewChunk {
            id: id.to_string(),
            ordinal,
            content: content.to_string(),
        }
    }

    #[test]
    fn lifecycle_pending_processing_ready() {
        let (store, tid, bot) = fixture();
        let src = make_source(&store, &tid, &bot.id);
        assert_eq!(src.status, SourceStatus::Pending);

        store.begin_processing(&src.id, &tid).unwrap();
        assert_eq!(
            store.get_source(&src.id, &tid).unwrap().status,
            SourceStatus::Processing
        );

        store
            .commit_ingest(&src.id, &tid, &bot.id, "text", &[chunk("c1", 0, "text")])
            .unwrap();
        store.finalize_ready(&src.id, &tid, 1, 1).unwrap();

        let done = store.get_source(&src.id, &tid).unwrap();
        assert_eq!(done.status, SourceStatus::Ready);
        assert_eq!(done.chunk_count, 1);
        assert!(done.last_refreshed_at.is_some());
    }

    #[test]
    fn error_path_records_message() {
        let (store, tid, bot) = fixture();
        let src = make_source(&store, &tid, &bot.id);
        store.begin_processing(&src.id, &tid).unwrap();
        store.finalize_error(&src.id, &tid, "fetch timed out").unwrap();

        let errored = store.get_source(&src.id, &tid).unwrap();
        assert_eq!(errored.status, SourceStatus::Error);
        assert_eq!(errored.last_error.as_deref(), Some("fetch timed out"));

        // A new run clears the stale error.
        store.begin_processing(&src.id, &tid).unwrap();
        assert!(store.get_source(&src.id, &tid).unwrap().last_error.is_none());
    }

    #[test]
    fn commit_ingest_replaces_prior_rows() {
        let (store, tid, bot) = fixture();
        let src = make_source(&store, &tid, &bot.id);

        store
            .commit_ingest(
                &src.id,
                &tid,
                &bot.id,
                "v1",
                &[chunk("a", 0, "v1-a"), chunk("b", 1, "v1-b")],
            )
            .unwrap();
        store
            .commit_ingest(&src.id, &tid, &bot.id, "v2", &[chunk("c", 0, "v2-c")])
            .unwrap();

        let chunks = store.list_chunks_by_source(&src.id, &tid).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "c");
        assert_eq!(chunks[0].vector_id, "c");

        let docs = store.list_documents(&src.id, &tid).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "v2");
    }

    #[test]
    fn chunk_fetch_is_tenant_scoped() {
        let (store, tid, bot) = fixture();
        let src = make_source(&store, &tid, &bot.id);
        store
            .commit_ingest(&src.id, &tid, &bot.id, "text", &[chunk("c1", 0, "text")])
            .unwrap();

        let other = store.create_tenant("Beta", "beta", "free").unwrap();
        let found = store
            .get_chunks_by_ids(&other.id, &["c1".to_string()])
            .unwrap();
        assert!(found.is_empty());

        let mine = store.get_chunks_by_ids(&tid, &["c1".to_string()]).unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[test]
    fn refresh_eligibility() {
        let (store, tid, bot) = fixture();
        let src = store
            .create_source(
                &tid,
                &bot.id,
                None,
                SourceType::Url,
                "docs",
                "https://example.com",
                "{}",
                RefreshSchedule::Hourly,
            )
            .unwrap();

        // Never refreshed → eligible immediately.
        assert_eq!(store.eligible_refresh_sources().unwrap().len(), 1);

        // Freshly refreshed → not eligible.
        store.finalize_ready(&src.id, &tid, 1, 1).unwrap();
        assert!(store.eligible_refresh_sources().unwrap().is_empty());

        // Backdate past the hourly interval → eligible again.
        let stale = (chrono::Utc::now() - chrono::Duration::minutes(70)).to_rfc3339();
        store.set_last_refreshed_at(&src.id, &tid, &stale).unwrap();
        assert_eq!(store.eligible_refresh_sources().unwrap().len(), 1);

        // Processing sources are skipped.
        store.begin_processing(&src.id, &tid).unwrap();
        assert!(store.eligible_refresh_sources().unwrap().is_empty());
    }
}
