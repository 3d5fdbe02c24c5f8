use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::info;

use minirag_core::config::VECTOR_COLLECTION;

use crate::error::{Result, VectorError};
use crate::store::{VectorHit, VectorPayload, VectorPoint, VectorStore};

/// Qdrant-backed implementation. Point ids are the chunk UUIDs, so upserts
/// are idempotent and the metadata store's `vector_id` column maps 1:1.
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

fn payload_field(map: &HashMap<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

fn to_payload(point: &VectorPoint) -> Result<Payload> {
    Payload::try_from(serde_json::json!({
        "tenant_id": point.payload.tenant_id,
        "bot_profile_id": point.payload.bot_profile_id,
        "source_id": point.payload.source_id,
        "chunk_id": point.payload.chunk_id,
    }))
    .map_err(|e| VectorError::Backend(e.to_string()))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dimension: u64) -> Result<()> {
        if self.client.collection_exists(VECTOR_COLLECTION).await? {
            return Ok(());
        }
        info!(collection = VECTOR_COLLECTION, dimension, "creating vector collection");
        self.client
            .create_collection(
                CreateCollectionBuilder::new(VECTOR_COLLECTION)
                    .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
            )
            .await?;
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut structs = Vec::with_capacity(points.len());
        for point in &points {
            let payload = to_payload(point)?;
            structs.push(PointStruct::new(
                point.id.clone(),
                point.vector.clone(),
                payload,
            ));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(VECTOR_COLLECTION, structs).wait(true))
            .await?;
        Ok(())
    }

    async fn delete_by_source(&self, tenant_id: &str, source_id: &str) -> Result<()> {
        let filter = Filter::must([
            Condition::matches("tenant_id", tenant_id.to_string()),
            Condition::matches("source_id", source_id.to_string()),
        ]);
        self.client
            .delete_points(
                DeletePointsBuilder::new(VECTOR_COLLECTION)
                    .points(filter)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        tenant_id: &str,
        bot_profile_id: &str,
        query: &[f32],
        top_k: u64,
    ) -> Result<Vec<VectorHit>> {
        // Both keys in one must-clause: the backend never sees an unfiltered
        // query against the shared collection.
        let filter = Filter::must([
            Condition::matches("tenant_id", tenant_id.to_string()),
            Condition::matches("bot_profile_id", bot_profile_id.to_string()),
        ]);

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(VECTOR_COLLECTION, query.to_vec(), top_k)
                    .filter(filter)
                    .with_payload(true),
            )
            .await?;

        let hits = response
            .result
            .into_iter()
            .map(|scored| {
                let payload = VectorPayload {
                    tenant_id: payload_field(&scored.payload, "tenant_id"),
                    bot_profile_id: payload_field(&scored.payload, "bot_profile_id"),
                    source_id: payload_field(&scored.payload, "source_id"),
                    chunk_id: payload_field(&scored.payload, "chunk_id"),
                };
                VectorHit {
                    chunk_id: payload.chunk_id.clone(),
                    score: scored.score,
                    payload,
                }
            })
            // search must never return a foreign tenant's vector
            .filter(|hit| hit.payload.tenant_id == tenant_id)
            .collect();

        Ok(hits)
    }

    async fn ping(&self) -> Result<()> {
        self.client.health_check().await?;
        Ok(())
    }
}
