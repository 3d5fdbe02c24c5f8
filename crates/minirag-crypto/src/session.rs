use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};
use crate::mac::{hmac_verify, HmacSha256};
use hmac::Mac;

/// Claims carried by a signed session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub tenant_id: String,
    pub role: String,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Issued-at, unix seconds.
    pub iat: i64,
}

/// Signs and verifies compact dotted session tokens:
/// `base64url(claims JSON) . base64url(HMAC-SHA256(signing_key, first segment))`.
///
/// Only keyed digests are accepted; there is no unsigned or "none" mode.
pub struct SessionSigner {
    key: Vec<u8>,
    ttl_secs: i64,
}

impl SessionSigner {
    pub fn new(signing_key: &str, ttl_secs: i64) -> Self {
        Self {
            key: signing_key.as_bytes().to_vec(),
            ttl_secs,
        }
    }

    pub fn sign(&self, user_id: &str, tenant_id: &str, role: &str) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            role: role.to_string(),
            exp: now + self.ttl_secs,
            iat: now,
        };
        let payload = B64URL.encode(serde_json::to_vec(&claims).map_err(|_| CryptoError::Encrypt)?);

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        let sig = B64URL.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", payload, sig))
    }

    /// Verify signature first, then expiry. Signature failures and malformed
    /// tokens are indistinguishable (`TokenInvalid`); only a valid signature
    /// with a past `exp` reports `TokenExpired`.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let (payload, sig) = token.split_once('.').ok_or(CryptoError::TokenInvalid)?;
        let sig_raw = B64URL.decode(sig).map_err(|_| CryptoError::TokenInvalid)?;

        if !hmac_verify(&self.key, payload.as_bytes(), &sig_raw) {
            return Err(CryptoError::TokenInvalid);
        }

        let claims_raw = B64URL.decode(payload).map_err(|_| CryptoError::TokenInvalid)?;
        let claims: SessionClaims =
            serde_json::from_slice(&claims_raw).map_err(|_| CryptoError::TokenInvalid)?;

        if claims.exp <= chrono::Utc::now().timestamp() {
            return Err(CryptoError::TokenExpired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let signer = SessionSigner::new("signing-key", 3600);
        let token = signer.sign("u1", "t1", "owner").unwrap();
        assert_eq!(token.matches('.').count(), 1);

        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.tenant_id, "t1");
        assert_eq!(claims.role, "owner");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_key_rejected() {
        let token = SessionSigner::new("key-a", 3600).sign("u1", "t1", "member").unwrap();
        let err = SessionSigner::new("key-b", 3600).verify(&token).unwrap_err();
        assert_eq!(err, CryptoError::TokenInvalid);
    }

    #[test]
    fn expired_is_distinguished() {
        let signer = SessionSigner::new("key", -60);
        let token = signer.sign("u1", "t1", "member").unwrap();
        assert_eq!(signer.verify(&token).unwrap_err(), CryptoError::TokenExpired);
    }

    #[test]
    fn tampered_payload_rejected() {
        let signer = SessionSigner::new("key", 3600);
        let token = signer.sign("u1", "t1", "member").unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged_claims = B64URL.encode(
            r#"{"sub":"u1","tenant_id":"t1","role":"owner","exp":9999999999,"iat":0}"#,
        );
        let forged = format!("{}.{}", forged_claims, sig);
        assert_eq!(signer.verify(&forged).unwrap_err(), CryptoError::TokenInvalid);
    }

    #[test]
    fn garbage_rejected() {
        let signer = SessionSigner::new("key", 3600);
        assert!(signer.verify("no-dot-here").is_err());
        assert!(signer.verify("a.b").is_err());
        assert!(signer.verify("").is_err());
    }
}
