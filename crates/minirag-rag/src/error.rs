use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("store error: {0}")]
    Store(#[from] minirag_store::StoreError),

    #[error("vector search failed: {0}")]
    Vector(#[from] minirag_vector::VectorError),

    #[error("provider error: {0}")]
    Provider(#[from] minirag_llm::ProviderError),

    #[error("vector search timed out")]
    SearchTimeout,
}

pub type Result<T> = std::result::Result<T, RagError>;
