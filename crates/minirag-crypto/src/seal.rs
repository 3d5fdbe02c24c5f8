use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use crate::error::{CryptoError, Result};

/// Marker prefix on ciphertexts so stored values are self-describing.
const ENC_PREFIX: &str = "enc:";

/// Authenticated field encryption for secrets at rest (bot provider
/// credentials). One process-wide key, loaded at startup; rotation is
/// future work.
///
/// Wire format: `enc:` + base64(nonce[12] || ciphertext+tag).
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Build from key material: 64 hex chars or base64 of exactly 32 bytes.
    pub fn from_key_material(material: &str) -> Result<Self> {
        let key = decode_key(material)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CryptoError::InvalidKey("encryption key must be 32 bytes".into()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt_value(&self, plain: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut packed = Vec::with_capacity(12 + ciphertext.len());
        packed.extend_from_slice(nonce.as_slice());
        packed.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", ENC_PREFIX, B64.encode(packed)))
    }

    pub fn decrypt_value(&self, sealed: &str) -> Result<String> {
        let encoded = sealed.strip_prefix(ENC_PREFIX).ok_or(CryptoError::Decrypt)?;
        let packed = B64.decode(encoded).map_err(|_| CryptoError::Decrypt)?;
        // 12-byte nonce plus at least the 16-byte GCM tag
        if packed.len() < 28 {
            return Err(CryptoError::Decrypt);
        }

        let (nonce, ciphertext) = packed.split_at(12);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| CryptoError::Decrypt)
    }
}

fn decode_key(material: &str) -> Result<Vec<u8>> {
    let material = material.trim();
    if material.len() == 64 {
        if let Ok(bytes) = hex::decode(material) {
            return Ok(bytes);
        }
    }
    if let Ok(bytes) = B64.decode(material) {
        if bytes.len() == 32 {
            return Ok(bytes);
        }
    }
    Err(CryptoError::InvalidKey(
        "expected a 256-bit key as 64 hex chars or base64".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FieldCipher {
        FieldCipher::from_key_material(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        let sealed = c.encrypt_value(r#"{"openai_api_key":"sk-test"}"#).unwrap();
        assert!(sealed.starts_with("enc:"));
        assert_eq!(
            c.decrypt_value(&sealed).unwrap(),
            r#"{"openai_api_key":"sk-test"}"#
        );
    }

    #[test]
    fn nonces_differ_per_encryption() {
        let c = cipher();
        assert_ne!(
            c.encrypt_value("same").unwrap(),
            c.encrypt_value("same").unwrap()
        );
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = cipher().encrypt_value("secret").unwrap();
        let other = FieldCipher::from_key_material(&"cd".repeat(32)).unwrap();
        assert_eq!(other.decrypt_value(&sealed), Err(CryptoError::Decrypt));
    }

    #[test]
    fn rejects_unsealed_input() {
        assert_eq!(cipher().decrypt_value("plaintext"), Err(CryptoError::Decrypt));
        assert_eq!(cipher().decrypt_value("enc:@@@"), Err(CryptoError::Decrypt));
    }

    #[test]
    fn base64_key_accepted() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let key = STANDARD.encode([7u8; 32]);
        assert!(FieldCipher::from_key_material(&key).is_ok());
    }

    #[test]
    fn bad_key_rejected() {
        assert!(FieldCipher::from_key_material("short").is_err());
    }
}
