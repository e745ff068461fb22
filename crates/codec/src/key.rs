use aes_gcm::{Aes256Gcm, Key};
use base64::prelude::*;
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CodecError, Result};

pub const KEY_LEN: usize = 32;

/// AES-256 key material supplied by the caller's key provider.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MetadataKey([u8; KEY_LEN]);

impl MetadataKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CodecError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Standard-alphabet base64, surrounding whitespace ignored.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| CodecError::InvalidKey(format!("not base64: {e}")))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    pub(crate) fn as_aes_key(&self) -> &Key<Aes256Gcm> {
        Key::<Aes256Gcm>::from_slice(&self.0)
    }
}

impl std::fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetadataKey(<redacted>)")
    }
}
