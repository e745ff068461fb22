//! Symmetric encryption of delivery metadata.
//!
//! Blobs produced here are opaque to every other component. Layout:
//!
//! ```text
//! [format: 1 byte = 0x01][nonce: 12 bytes][AES-256-GCM ciphertext || tag]
//! ```

mod key;

pub use key::{MetadataKey, KEY_LEN};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use thiserror::Error;

pub const BLOB_FORMAT_V1: u8 = 0x01;
pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encryption,

    /// Wrong key, tampered blob, or a blob this codec did not produce.
    #[error("decryption failed: {0}")]
    DecryptionFailure(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Stateless apart from the key it is constructed with; safe to share across threads.
#[derive(Clone)]
pub struct MetadataCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for MetadataCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCodec").finish_non_exhaustive()
    }
}

impl MetadataCodec {
    pub fn new(key: &MetadataKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.as_aes_key()),
        }
    }

    /// Encrypts under a fresh random nonce, so equal plaintexts give different blobs.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CodecError::Encryption)?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.push(BLOB_FORMAT_V1);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < HEADER_LEN + TAG_LEN {
            return Err(CodecError::DecryptionFailure(format!(
                "blob too short: {} bytes",
                blob.len()
            )));
        }
        let (header, ciphertext) = blob.split_at(HEADER_LEN);
        if header[0] != BLOB_FORMAT_V1 {
            return Err(CodecError::DecryptionFailure(format!(
                "unsupported blob format {:#04x}",
                header[0]
            )));
        }
        let nonce = Nonce::from_slice(&header[1..]);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CodecError::DecryptionFailure("authentication failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MetadataCodec {
        MetadataCodec::new(&MetadataKey::generate())
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        let blob = codec.encrypt(b"{\"sender\":\"a\"}").unwrap();
        assert_eq!(blob[0], BLOB_FORMAT_V1);
        assert_eq!(blob.len(), HEADER_LEN + 14 + TAG_LEN);
        assert_eq!(codec.decrypt(&blob).unwrap(), b"{\"sender\":\"a\"}");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let codec = codec();
        let blob = codec.encrypt(b"").unwrap();
        assert!(codec.decrypt(&blob).unwrap().is_empty());
    }

    #[test]
    fn ciphertext_is_not_deterministic() {
        let codec = codec();
        let a = codec.encrypt(b"same").unwrap();
        let b = codec.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let blob = codec().encrypt(b"secret").unwrap();
        let err = codec().decrypt(&blob).unwrap_err();
        assert!(matches!(err, CodecError::DecryptionFailure(_)));
    }

    #[test]
    fn tampered_blob_fails() {
        let codec = codec();
        let mut blob = codec.encrypt(b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            codec.decrypt(&blob),
            Err(CodecError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn unknown_format_fails() {
        let codec = codec();
        let mut blob = codec.encrypt(b"secret").unwrap();
        blob[0] = 0x7f;
        let err = codec.decrypt(&blob).unwrap_err();
        assert!(err.to_string().contains("unsupported blob format"));
    }

    #[test]
    fn short_blob_fails() {
        let codec = codec();
        assert!(matches!(
            codec.decrypt(&[BLOB_FORMAT_V1; 10]),
            Err(CodecError::DecryptionFailure(_))
        ));
        assert!(codec.decrypt(&[]).is_err());
    }
}
