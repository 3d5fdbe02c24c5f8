use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector backend error: {0}")]
    Backend(String),

    #[error("vector store misconfigured: {0}")]
    Config(String),
}

impl From<qdrant_client::QdrantError> for VectorError {
    fn from(e: qdrant_client::QdrantError) -> Self {
        VectorError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VectorError>;
