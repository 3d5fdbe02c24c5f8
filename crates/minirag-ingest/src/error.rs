use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] minirag_store::StoreError),

    #[error("vector store error: {0}")]
    Vector(#[from] minirag_vector::VectorError),

    #[error("embedding failed: {0}")]
    Provider(#[from] minirag_llm::ProviderError),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("queue error: {0}")]
    Queue(#[from] minirag_queue::QueueError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
