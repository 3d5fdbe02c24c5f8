use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::qdrant::QdrantStore;

/// Payload attached to every vector in the shared collection. `tenant_id`
/// and `bot_profile_id` are the isolation keys; `source_id` drives
/// reclamation; `chunk_id` links back to the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub tenant_id: String,
    pub bot_profile_id: String,
    pub source_id: String,
    pub chunk_id: String,
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    /// Equals the chunk id; upserts are idempotent by this id.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub score: f32,
    pub payload: VectorPayload,
}

/// Uniform interface over vector backends. Implementations must apply the
/// tenant (and bot) filter inside the backend query, not post-hoc.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection with the given dimensionality if it does not
    /// exist yet. Called once at startup.
    async fn ensure_collection(&self, dimension: u64) -> Result<()>;

    /// Idempotent by point id: re-upserting the same id overwrites.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Remove every vector tagged with this tenant + source.
    async fn delete_by_source(&self, tenant_id: &str, source_id: &str) -> Result<()>;

    /// Top-k by similarity, hard-filtered on tenant and bot.
    async fn search(
        &self,
        tenant_id: &str,
        bot_profile_id: &str,
        query: &[f32],
        top_k: u64,
    ) -> Result<Vec<VectorHit>>;

    /// Connectivity probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}

/// Select a backend from config: a qdrant URL when one is set, otherwise the
/// in-process store. Ensures the collection exists before returning.
pub async fn connect(url: Option<&str>, dimension: u64) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match url {
        Some(url) => Arc::new(QdrantStore::new(url)?),
        None => Arc::new(MemoryStore::new()),
    };
    store.ensure_collection(dimension).await?;
    Ok(store)
}
