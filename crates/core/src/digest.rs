use sha2::{Digest, Sha256};

/// Hex SHA-256 of an opaque blob, used to reference ciphertext in logs and history.
pub fn compute_sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
