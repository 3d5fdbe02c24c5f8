use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("password hashing failed: {0}")]
    Password(String),

    #[error("session token is malformed or has a bad signature")]
    TokenInvalid,

    #[error("session token expired")]
    TokenExpired,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
