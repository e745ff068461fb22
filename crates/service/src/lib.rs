//! Plaintext-facing facade over the ledger and the metadata codec.
//!
//! Callers hand in [`DeliveryMeta`]; the ledger only ever sees the encrypted
//! snapshot. Each update re-encrypts the full metadata.

use codec::{CodecError, MetadataCodec};
use ledger::{DeliveryRecord, LedgerError, StatusLedger, TransitionEntry};
use parcel_track_core::{validation, DeliveryMeta, DeliveryModel, DeliveryStatus};
use thiserror::Error;

/// Errors surfaced to callers. None are retried internally.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("package {0} already exists")]
    DuplicateKey(String),

    #[error("package {0} not found")]
    UnknownKey(String),

    /// `from` is `None` when a package was rejected at creation (terminal initial status).
    #[error("package {package_id}: transition {} -> {to} is not allowed", describe_from(.from))]
    InvalidTransition {
        package_id: String,
        from: Option<DeliveryStatus>,
        to: DeliveryStatus,
    },

    #[error("metadata decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("metadata rejected: {0}")]
    SerializationFailure(String),

    #[error("stored metadata unreadable: {0}")]
    DeserializationFailure(String),

    #[error("package {package_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        package_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("storage: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

fn describe_from(from: &Option<DeliveryStatus>) -> String {
    from.map_or_else(|| "(new)".to_string(), |s| s.to_string())
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::DuplicateKey(id) => ServiceError::DuplicateKey(id),
            LedgerError::UnknownKey(id) => ServiceError::UnknownKey(id),
            LedgerError::InvalidTransition {
                package_id,
                from,
                to,
            } => ServiceError::InvalidTransition {
                package_id,
                from: Some(from),
                to,
            },
            LedgerError::InvalidInitialStatus { package_id, status } => {
                ServiceError::InvalidTransition {
                    package_id,
                    from: None,
                    to: status,
                }
            }
            LedgerError::VersionConflict {
                package_id,
                expected,
                actual,
            } => ServiceError::VersionConflict {
                package_id,
                expected,
                actual,
            },
            LedgerError::InvalidPackageId(msg) => ServiceError::SerializationFailure(msg),
            e @ (LedgerError::Encoding(_) | LedgerError::Storage(_)) => {
                ServiceError::Storage(e.to_string())
            }
        }
    }
}

impl From<CodecError> for ServiceError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::DecryptionFailure(msg) => ServiceError::DecryptionFailure(msg),
            e @ (CodecError::InvalidKey(_) | CodecError::Encryption) => {
                ServiceError::SerializationFailure(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryService {
    ledger: StatusLedger,
    codec: MetadataCodec,
}

impl DeliveryService {
    pub fn new(ledger: StatusLedger, codec: MetadataCodec) -> Self {
        Self { ledger, codec }
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    /// Registers a new package directly at `Dispatched`.
    pub fn create_delivery(&self, package_id: &str, meta: &DeliveryMeta) -> Result<DeliveryStatus> {
        self.create_delivery_at(package_id, DeliveryStatus::Dispatched, meta)
    }

    /// Registers a new package at a caller-chosen, non-terminal status.
    pub fn create_delivery_at(
        &self,
        package_id: &str,
        initial_status: DeliveryStatus,
        meta: &DeliveryMeta,
    ) -> Result<DeliveryStatus> {
        if initial_status.is_terminal() {
            return Err(ServiceError::InvalidTransition {
                package_id: package_id.to_string(),
                from: None,
                to: initial_status,
            });
        }
        let blob = self.seal(meta, initial_status)?;
        let record = self.ledger.create(package_id, initial_status, blob)?;
        Ok(record.status)
    }

    /// Moves a package to `new_status` with a fresh metadata snapshot.
    ///
    /// `meta.delivery_time` must be set by the caller when moving to `Delivered`
    /// and absent otherwise; `meta.dispatch_time` must match the stored value.
    pub fn update_status(
        &self,
        package_id: &str,
        new_status: DeliveryStatus,
        meta: &DeliveryMeta,
    ) -> Result<DeliveryStatus> {
        let blob = self.prepare_update(package_id, None, new_status, meta)?;
        let record = self.ledger.transition(package_id, new_status, blob)?;
        Ok(record.status)
    }

    /// [`DeliveryService::update_status`] guarded by the record version the caller last saw.
    pub fn update_status_if_version(
        &self,
        package_id: &str,
        expected_version: u64,
        new_status: DeliveryStatus,
        meta: &DeliveryMeta,
    ) -> Result<DeliveryStatus> {
        let blob = self.prepare_update(package_id, Some(expected_version), new_status, meta)?;
        let record = self
            .ledger
            .transition_if_version(package_id, expected_version, new_status, blob)?;
        Ok(record.status)
    }

    pub fn get_status(&self, package_id: &str) -> Result<DeliveryStatus> {
        Ok(self.ledger.get_status(package_id)?)
    }

    pub fn get_delivery(&self, package_id: &str) -> Result<DeliveryModel> {
        let record = self.ledger.get(package_id)?;
        self.open(record)
    }

    /// All deliveries, most recently created first.
    pub fn list_deliveries(&self) -> Result<Vec<DeliveryModel>> {
        self.ledger
            .list()?
            .into_iter()
            .map(|record| self.open(record))
            .collect()
    }

    pub fn history(&self, package_id: &str) -> Result<Vec<TransitionEntry>> {
        Ok(self.ledger.history(package_id)?)
    }

    // The ledger re-checks version and table atomically; these early checks only
    // decide which error a caller sees when both the move and the metadata are wrong.
    fn prepare_update(
        &self,
        package_id: &str,
        expected_version: Option<u64>,
        new_status: DeliveryStatus,
        meta: &DeliveryMeta,
    ) -> Result<Vec<u8>> {
        let current = self.ledger.get(package_id)?;
        if let Some(expected) = expected_version.filter(|v| *v != current.version) {
            return Err(ServiceError::VersionConflict {
                package_id: package_id.to_string(),
                expected,
                actual: current.version,
            });
        }
        if !current.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition {
                package_id: package_id.to_string(),
                from: Some(current.status),
                to: new_status,
            });
        }

        let stored = self.decode_meta(&current.encrypted_meta)?;
        if stored.dispatch_time != meta.dispatch_time {
            return Err(ServiceError::SerializationFailure(format!(
                "dispatch time is immutable (stored {}, given {})",
                stored.dispatch_time.to_rfc3339(),
                meta.dispatch_time.to_rfc3339()
            )));
        }

        self.seal(meta, new_status)
    }

    fn seal(&self, meta: &DeliveryMeta, status: DeliveryStatus) -> Result<Vec<u8>> {
        validation::validate(meta, status)
            .map_err(|errs| ServiceError::SerializationFailure(errs.join("; ")))?;
        let plaintext = serde_json::to_vec(meta)
            .map_err(|e| ServiceError::SerializationFailure(e.to_string()))?;
        Ok(self.codec.encrypt(&plaintext)?)
    }

    fn open(&self, record: DeliveryRecord) -> Result<DeliveryModel> {
        let meta = self.decode_meta(&record.encrypted_meta)?;
        Ok(DeliveryModel {
            package_id: record.package_id,
            status: record.status,
            version: record.version,
            meta,
        })
    }

    fn decode_meta(&self, blob: &[u8]) -> Result<DeliveryMeta> {
        let plaintext = self.codec.decrypt(blob)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            tracing::warn!(error=%e, "decrypted metadata did not deserialize");
            ServiceError::DeserializationFailure(e.to_string())
        })
    }
}
