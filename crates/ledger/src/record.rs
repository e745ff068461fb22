use chrono::{DateTime, Utc};
use parcel_track_core::{digest::compute_sha256_hex, DeliveryStatus};
use serde::{Deserialize, Serialize};

/// Stored state of one package. `encrypted_meta` is never decoded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub package_id: String,
    pub status: DeliveryStatus,
    #[serde(with = "base64_blob")]
    pub encrypted_meta: Vec<u8>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn meta_digest(&self) -> String {
        compute_sha256_hex(&self.encrypted_meta)
    }
}

/// One committed step in a record's life. `from` is `None` for the creation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub package_id: String,
    pub version: u64,
    pub from: Option<DeliveryStatus>,
    pub to: DeliveryStatus,
    pub at: DateTime<Utc>,
    pub meta_digest: String,
}

impl TransitionEntry {
    pub(crate) fn for_record(record: &DeliveryRecord, from: Option<DeliveryStatus>) -> Self {
        Self {
            package_id: record.package_id.clone(),
            version: record.version,
            from,
            to: record.status,
            at: record.updated_at,
            meta_digest: record.meta_digest(),
        }
    }
}

/// `package_id ‖ 0x00 ‖ version (big-endian)`, so a prefix scan yields one
/// record's history in version order. Package ids never contain NUL.
pub(crate) fn history_key(package_id: &str, version: u64) -> Vec<u8> {
    let mut key = history_prefix(package_id);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

pub(crate) fn history_prefix(package_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(package_id.len() + 9);
    key.extend_from_slice(package_id.as_bytes());
    key.push(0);
    key
}

mod base64_blob {
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_is_stored_as_base64() {
        let now = Utc::now();
        let record = DeliveryRecord {
            package_id: "PKG001".into(),
            status: DeliveryStatus::Dispatched,
            encrypted_meta: vec![0xde, 0xad, 0xbe, 0xef],
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["encrypted_meta"], "3q2+7w==");
        assert_eq!(json["status"], "dispatched");

        let back: DeliveryRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn history_keys_sort_by_version() {
        let k2 = history_key("PKG", 2);
        let k10 = history_key("PKG", 10);
        assert!(k2 < k10);
        assert!(k2.starts_with(&history_prefix("PKG")));
        assert!(!history_key("PKG1", 1).starts_with(&history_prefix("PKG")));
    }
}
