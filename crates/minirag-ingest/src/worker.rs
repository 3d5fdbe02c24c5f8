use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use minirag_crypto::FieldCipher;
use minirag_hooks::{WebhookDispatcher, EVENT_SOURCE_FAILED, EVENT_SOURCE_INGESTED};
use minirag_llm::{BotCredentials, ProviderRouter};
use minirag_queue::JobHandler;
use minirag_store::types::{NewChunk, Source, SourceType};
use minirag_store::MetaStore;
use minirag_vector::{VectorPayload, VectorPoint, VectorStore};

use crate::chunker::chunk_text;
use crate::error::{IngestError, Result};
use crate::extract::fetch_url;

pub const INGEST_JOB: &str = "ingest_source";

/// Embedding requests are batched to bound request size; order within and
/// across batches is preserved.
const EMBED_BATCH: usize = 128;

#[derive(Debug, Deserialize)]
struct IngestArgs {
    source_id: String,
    tenant_id: String,
}

/// Deterministic chunk id: UUIDv5 under the source's namespace, named by
/// ordinal and content.
fn chunk_id(source_id: &str, ordinal: u32, content: &str) -> String {
    let namespace =
        uuid::Uuid::parse_str(source_id).unwrap_or(uuid::Uuid::NAMESPACE_OID);
    uuid::Uuid::new_v5(&namespace, format!("{}:{}", ordinal, content).as_bytes()).to_string()
}

/// Handler for `ingest_source` jobs. Idempotent on `(source_id)`: every run
/// replaces the source's chunks and vectors wholesale, so re-delivery and
/// concurrent runs settle on the last committed state.
pub struct IngestWorker {
    store: MetaStore,
    vector: Arc<dyn VectorStore>,
    llm: Arc<ProviderRouter>,
    hooks: WebhookDispatcher,
    cipher: Arc<FieldCipher>,
    http: reqwest::Client,
    embedding_model: String,
    fetch_timeout: Duration,
}

impl IngestWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: MetaStore,
        vector: Arc<dyn VectorStore>,
        llm: Arc<ProviderRouter>,
        hooks: WebhookDispatcher,
        cipher: Arc<FieldCipher>,
        embedding_model: String,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            vector,
            llm,
            hooks,
            cipher,
            http: reqwest::Client::new(),
            embedding_model,
            fetch_timeout,
        }
    }

    /// Run the full pipeline for one source. Errors returned here are
    /// infrastructure failures worth a queue retry; content-level failures
    /// are finalized on the source row and reported as `Ok`.
    async fn ingest(&self, source_id: &str, tenant_id: &str) -> Result<()> {
        // Missing or deactivated source: the job is stale, drop it quietly.
        let source = match self.store.get_source(source_id, tenant_id) {
            Ok(source) if source.is_active => source,
            Ok(_) => {
                info!(source_id, "source inactive; skipping ingest");
                return Ok(());
            }
            Err(minirag_store::StoreError::NotFound { .. }) => {
                info!(source_id, "source gone; skipping ingest");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.store.begin_processing(source_id, tenant_id)?;

        let content = match self.extract_content(&source).await {
            Ok(content) => content,
            Err(e) => {
                self.fail(&source, &e.to_string())?;
                return Ok(());
            }
        };

        let chunks = chunk_text(&content);
        let embed_key = self.embed_key_for(&source);

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            match self
                .llm
                .embed(&self.embedding_model, &texts, embed_key.as_deref())
                .await
            {
                Ok(batch_vectors) => vectors.extend(batch_vectors),
                Err(e) => {
                    self.fail(&source, &format!("embedding failed: {}", e))?;
                    return Ok(());
                }
            }
        }

        // Vector replacement: reclaim the previous set, write chunk rows,
        // then upsert under the same ids the rows carry. Chunk ids are
        // derived from (source, ordinal, content), so re-ingesting unchanged
        // content lands on the identical vector ids.
        let new_chunks: Vec<NewChunk> = chunks
            .iter()
            .map(|c| NewChunk {
                id: chunk_id(source_id, c.ordinal, &c.content),
                ordinal: c.ordinal,
                content: c.content.clone(),
            })
            .collect();

        if let Err(e) = self.vector.delete_by_source(tenant_id, source_id).await {
            self.fail(&source, &format!("vector delete failed: {}", e))?;
            return Ok(());
        }

        self.store.commit_ingest(
            source_id,
            tenant_id,
            &source.bot_profile_id,
            &content,
            &new_chunks,
        )?;

        let points: Vec<VectorPoint> = new_chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.id.clone(),
                vector,
                payload: VectorPayload {
                    tenant_id: tenant_id.to_string(),
                    bot_profile_id: source.bot_profile_id.clone(),
                    source_id: source_id.to_string(),
                    chunk_id: chunk.id.clone(),
                },
            })
            .collect();

        if let Err(e) = self.vector.upsert(points).await {
            self.fail(&source, &format!("vector upsert failed: {}", e))?;
            return Ok(());
        }

        let chunk_count = new_chunks.len() as u32;
        self.store
            .finalize_ready(source_id, tenant_id, 1, chunk_count)?;

        info!(source_id, tenant_id, chunk_count, "source ingested");
        self.hooks.dispatch(
            tenant_id,
            EVENT_SOURCE_INGESTED,
            serde_json::json!({
                "source_id": source_id,
                "source_name": source.name,
                "document_count": 1,
                "chunk_count": chunk_count,
            }),
        );
        Ok(())
    }

    async fn extract_content(&self, source: &Source) -> Result<String> {
        match source.source_type {
            // Raw text and uploads arrive with `content` already populated
            // (uploads are extracted at upload time).
            SourceType::Text | SourceType::Upload => Ok(source.content.clone()),
            SourceType::Url => fetch_url(&self.http, &source.content, self.fetch_timeout).await,
        }
    }

    /// Per-bot credentials override the process default for the embedding
    /// provider; a bot without credentials (or an unreadable blob) falls
    /// back silently.
    fn embed_key_for(&self, source: &Source) -> Option<String> {
        let bot = self
            .store
            .get_bot_profile(&source.bot_profile_id, &source.tenant_id)
            .ok()?;
        let sealed = bot.encrypted_credentials?;
        let plain = self.cipher.decrypt_value(&sealed).ok()?;
        BotCredentials::parse(&plain)
            .key_for_model(&self.embedding_model)
            .map(String::from)
    }

    fn fail(&self, source: &Source, error: &str) -> Result<()> {
        warn!(source_id = %source.id, error, "ingest failed");
        self.store
            .finalize_error(&source.id, &source.tenant_id, error)?;
        self.hooks.dispatch(
            &source.tenant_id,
            EVENT_SOURCE_FAILED,
            serde_json::json!({
                "source_id": source.id,
                "error": error,
            }),
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler for IngestWorker {
    async fn handle(&self, args: serde_json::Value) -> std::result::Result<(), String> {
        let args: IngestArgs =
            serde_json::from_value(args).map_err(|e| format!("bad ingest args: {}", e))?;
        self.ingest(&args.source_id, &args.tenant_id)
            .await
            .map_err(|e| e.to_string())
    }
}
