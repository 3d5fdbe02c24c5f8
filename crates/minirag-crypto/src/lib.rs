//! Cryptography primitives: password hashing, field encryption, signed
//! session tokens, opaque API-token digests, and webhook signing.
//!
//! Key material flows in, never out: no function logs or embeds secrets in
//! error values.

pub mod error;
pub mod mac;
pub mod password;
pub mod seal;
pub mod session;
pub mod token;

pub use error::{CryptoError, Result};
pub use mac::hmac_sign;
pub use password::{hash_password, verify_password};
pub use seal::FieldCipher;
pub use session::{SessionClaims, SessionSigner};
pub use token::{generate_secret, hash_api_token};
