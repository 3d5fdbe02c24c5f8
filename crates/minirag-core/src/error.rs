use thiserror::Error;

/// Error kinds shared across the platform. Subsystem crates carry their own
/// error enums and convert into these at the gateway boundary, where
/// `status()` drives the HTTP mapping.
#[derive(Debug, Error)]
pub enum MiniragError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiniragError {
    /// HTTP status for this kind. Config/Serialization/Io only surface as
    /// internal failures once the process is serving requests.
    pub fn status(&self) -> u16 {
        match self {
            MiniragError::Unauthenticated(_) => 401,
            MiniragError::Forbidden(_) => 403,
            MiniragError::NotFound(_) => 404,
            MiniragError::Conflict(_) => 409,
            MiniragError::InvalidInput(_) => 422,
            MiniragError::Upstream(_) => 502,
            MiniragError::Config(_)
            | MiniragError::Serialization(_)
            | MiniragError::Io(_)
            | MiniragError::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, MiniragError>;
