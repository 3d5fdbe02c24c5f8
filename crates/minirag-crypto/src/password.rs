use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{CryptoError, Result};

/// Argon2id hash with a per-password random salt embedded in the PHC-format
/// digest string.
pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let digest = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| CryptoError::Password(e.to_string()))?;
    Ok(digest.to_string())
}

/// Verify a password against a stored PHC digest. Malformed digests verify
/// as false rather than erroring; authentication always fails closed.
pub fn verify_password(plain: &str, digest: &str) -> bool {
    match PasswordHash::new(digest) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let digest = hash_password("pw12345678").unwrap();
        assert!(digest.starts_with("$argon2"));
        assert!(verify_password("pw12345678", &digest));
        assert!(!verify_password("wrong", &digest));
    }

    #[test]
    fn salts_differ_per_hash() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_digest_fails_closed() {
        assert!(!verify_password("anything", "not-a-digest"));
        assert!(!verify_password("anything", ""));
    }
}
