use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Gateway-boundary error. Subsystem errors convert into one of these kinds
/// and map onto the HTTP contract: 401/403/404/409/422/5xx with a `{detail}`
/// body.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    InvalidInput(String),
    Upstream(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &str {
        match self {
            ApiError::Unauthenticated(d)
            | ApiError::Forbidden(d)
            | ApiError::NotFound(d)
            | ApiError::Conflict(d)
            | ApiError::InvalidInput(d)
            | ApiError::Upstream(d)
            | ApiError::Internal(d) => d,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<minirag_store::StoreError> for ApiError {
    fn from(e: minirag_store::StoreError) -> Self {
        use minirag_store::StoreError;
        match e {
            StoreError::NotFound { entity } => ApiError::NotFound(format!("{} not found", entity)),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            StoreError::Database(e) => {
                tracing::error!("database error: {e}");
                ApiError::Internal("storage failure".to_string())
            }
            StoreError::Serialization(e) => {
                tracing::error!("serialization error: {e}");
                ApiError::Internal("storage failure".to_string())
            }
        }
    }
}

impl From<minirag_crypto::CryptoError> for ApiError {
    fn from(e: minirag_crypto::CryptoError) -> Self {
        use minirag_crypto::CryptoError;
        match e {
            // The expired case is deliberately distinguishable; every other
            // verification failure reads the same to the caller.
            CryptoError::TokenExpired => ApiError::Unauthenticated("expired".to_string()),
            CryptoError::TokenInvalid => {
                ApiError::Unauthenticated("invalid credentials".to_string())
            }
            CryptoError::Password(_) | CryptoError::InvalidKey(_) => {
                ApiError::Internal("cryptography failure".to_string())
            }
            CryptoError::Encrypt | CryptoError::Decrypt => {
                ApiError::Internal("cryptography failure".to_string())
            }
        }
    }
}

impl From<minirag_llm::ProviderError> for ApiError {
    fn from(e: minirag_llm::ProviderError) -> Self {
        use minirag_llm::ProviderError;
        match e {
            ProviderError::InvalidModel(m) => {
                ApiError::InvalidInput(format!("unsupported model: {}", m))
            }
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<minirag_vector::VectorError> for ApiError {
    fn from(e: minirag_vector::VectorError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

impl From<minirag_queue::QueueError> for ApiError {
    fn from(e: minirag_queue::QueueError) -> Self {
        tracing::error!("queue error: {e}");
        ApiError::Upstream("queue unavailable".to_string())
    }
}

impl From<minirag_rag::RagError> for ApiError {
    fn from(e: minirag_rag::RagError) -> Self {
        use minirag_rag::RagError;
        match e {
            RagError::Store(e) => e.into(),
            RagError::Provider(e) => e.into(),
            RagError::Vector(e) => e.into(),
            RagError::SearchTimeout => ApiError::Upstream("vector search timed out".to_string()),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
