use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generate a high-entropy opaque secret with the given prefix: 32 random
/// bytes, hex-encoded. The result never contains `.`, which keeps the
/// bearer-credential dispatch rule (dotted = signed session) unambiguous.
pub fn generate_secret(prefix: &str) -> String {
    let mut raw = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    format!("{}{}", prefix, hex::encode(raw))
}

/// Keyless deterministic digest of an opaque API token. Determinism is the
/// point: the hex digest is stored under a unique index so a single lookup
/// resolves the presented token.
pub fn hash_api_token(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}
