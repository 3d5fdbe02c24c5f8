use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::{VectorHit, VectorPayload, VectorPoint, VectorStore};

/// In-process backend with exact cosine scoring. Used by the test suites and
/// by deployments that run without a vector service; it honors the same
/// payload-filter contract as the qdrant backend.
#[derive(Default)]
pub struct MemoryStore {
    points: RwLock<HashMap<String, (Vec<f32>, VectorPayload)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, _dimension: u64) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut map = self.points.write().unwrap();
        for p in points {
            map.insert(p.id, (p.vector, p.payload));
        }
        Ok(())
    }

    async fn delete_by_source(&self, tenant_id: &str, source_id: &str) -> Result<()> {
        let mut map = self.points.write().unwrap();
        map.retain(|_, (_, payload)| {
            !(payload.tenant_id == tenant_id && payload.source_id == source_id)
        });
        Ok(())
    }

    async fn search(
        &self,
        tenant_id: &str,
        bot_profile_id: &str,
        query: &[f32],
        top_k: u64,
    ) -> Result<Vec<VectorHit>> {
        let map = self.points.read().unwrap();
        let mut hits: Vec<VectorHit> = map
            .iter()
            .filter(|(_, (_, payload))| {
                payload.tenant_id == tenant_id && payload.bot_profile_id == bot_profile_id
            })
            .map(|(id, (vector, payload))| VectorHit {
                chunk_id: id.clone(),
                score: cosine(query, vector),
                payload: payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k as usize);
        Ok(hits)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
