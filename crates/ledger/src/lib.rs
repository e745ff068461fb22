//! Keyed store of delivery records enforcing the status transition table.
//!
//! Records live in a sled database. Each create or transition runs as a single
//! transaction over the `records` and `history` trees: the transition table is
//! checked against the state read inside that transaction, so concurrent
//! writers on the same package serialize and a failed step leaves nothing behind.

mod audit;
mod record;

pub use audit::{read_audit_log, AuditEvent, AuditLog};
pub use record::{DeliveryRecord, TransitionEntry};

use chrono::Utc;
use parcel_track_core::{validation::validate_package_id, DeliveryStatus};
use record::{history_key, history_prefix};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const RECORDS_TREE: &str = "records";
const HISTORY_TREE: &str = "history";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("package {0} already exists")]
    DuplicateKey(String),

    #[error("package {0} not found")]
    UnknownKey(String),

    #[error("package {package_id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        package_id: String,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("package {package_id}: {status} is terminal and cannot be used as an initial status")]
    InvalidInitialStatus {
        package_id: String,
        status: DeliveryStatus,
    },

    #[error("invalid package id: {0}")]
    InvalidPackageId(String),

    #[error("package {package_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        package_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("record encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("storage: {0}")]
    Storage(#[from] sled::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Clone)]
pub struct StatusLedger {
    db: Db,
    records: Tree,
    history: Tree,
    audit: Option<Arc<AuditLog>>,
}

impl std::fmt::Debug for StatusLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusLedger")
            .field("records", &self.records.len())
            .field("audit", &self.audit.as_ref().map(|a| a.path().to_path_buf()))
            .finish_non_exhaustive()
    }
}

impl StatusLedger {
    /// Durable ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Ephemeral ledger, removed when the last handle is dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        let records = db.open_tree(RECORDS_TREE)?;
        let history = db.open_tree(HISTORY_TREE)?;
        Ok(Self {
            db,
            records,
            history,
            audit: None,
        })
    }

    pub fn with_audit_log(mut self, path: impl AsRef<Path>) -> Self {
        self.audit = Some(Arc::new(AuditLog::new(path.as_ref())));
        self
    }

    /// Inserts a new record at version 1. Fails on an existing id; never overwrites.
    pub fn create(
        &self,
        package_id: &str,
        initial_status: DeliveryStatus,
        encrypted_meta: Vec<u8>,
    ) -> Result<DeliveryRecord> {
        validate_package_id(package_id).map_err(LedgerError::InvalidPackageId)?;
        if initial_status.is_terminal() {
            return Err(LedgerError::InvalidInitialStatus {
                package_id: package_id.to_string(),
                status: initial_status,
            });
        }

        let now = Utc::now();
        let record = DeliveryRecord {
            package_id: package_id.to_string(),
            status: initial_status,
            encrypted_meta,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let record_bytes = serde_json::to_vec(&record)?;
        let entry_bytes = serde_json::to_vec(&TransitionEntry::for_record(&record, None))?;
        let key = package_id.as_bytes();

        let outcome = (&self.records, &self.history).transaction(|(records, history)| {
            if records.get(key)?.is_some() {
                return abort(LedgerError::DuplicateKey(package_id.to_string()));
            }
            records.insert(key, record_bytes.as_slice())?;
            history.insert(history_key(package_id, record.version), entry_bytes.as_slice())?;
            Ok(())
        });

        match outcome.map_err(unwrap_tx_error) {
            Ok(()) => {
                tracing::info!(package_id, status=%record.status, version=record.version, "delivery record created");
                self.audit(
                    AuditEvent::new("delivery_created", package_id, record.status.as_str())
                        .with_version(record.version)
                        .with_digest(record.meta_digest()),
                );
                Ok(record)
            }
            Err(err) => {
                tracing::warn!(package_id, error=%err, "delivery record creation rejected");
                self.audit(
                    AuditEvent::new("create_rejected", package_id, initial_status.as_str())
                        .with_error(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// Moves a record to `new_status` and replaces its blob, bumping the version.
    pub fn transition(
        &self,
        package_id: &str,
        new_status: DeliveryStatus,
        encrypted_meta: Vec<u8>,
    ) -> Result<DeliveryRecord> {
        self.apply_transition(package_id, None, new_status, encrypted_meta)
    }

    /// Like [`StatusLedger::transition`], but only if the stored version is `expected_version`.
    pub fn transition_if_version(
        &self,
        package_id: &str,
        expected_version: u64,
        new_status: DeliveryStatus,
        encrypted_meta: Vec<u8>,
    ) -> Result<DeliveryRecord> {
        self.apply_transition(package_id, Some(expected_version), new_status, encrypted_meta)
    }

    fn apply_transition(
        &self,
        package_id: &str,
        expected_version: Option<u64>,
        new_status: DeliveryStatus,
        encrypted_meta: Vec<u8>,
    ) -> Result<DeliveryRecord> {
        let key = package_id.as_bytes();
        let now = Utc::now();

        let outcome = (&self.records, &self.history).transaction(|(records, history)| {
            let current = match records.get(key)? {
                Some(bytes) => decode_record(&bytes).map_err(ConflictableTransactionError::Abort)?,
                None => return abort(LedgerError::UnknownKey(package_id.to_string())),
            };
            if let Some(expected) = expected_version {
                if current.version != expected {
                    return abort(LedgerError::VersionConflict {
                        package_id: package_id.to_string(),
                        expected,
                        actual: current.version,
                    });
                }
            }
            if !current.status.can_transition_to(new_status) {
                return abort(LedgerError::InvalidTransition {
                    package_id: package_id.to_string(),
                    from: current.status,
                    to: new_status,
                });
            }

            let from = current.status;
            let updated = DeliveryRecord {
                status: new_status,
                encrypted_meta: encrypted_meta.clone(),
                version: current.version + 1,
                updated_at: now,
                ..current
            };
            let entry = TransitionEntry::for_record(&updated, Some(from));

            records.insert(key, encode(&updated)?)?;
            history.insert(history_key(package_id, updated.version), encode(&entry)?)?;
            Ok((from, updated))
        });

        match outcome.map_err(unwrap_tx_error) {
            Ok((from, record)) => {
                tracing::info!(package_id, %from, to=%record.status, version=record.version, "delivery status changed");
                self.audit(
                    AuditEvent::new("status_transitioned", package_id, record.status.as_str())
                        .with_version(record.version)
                        .with_digest(record.meta_digest()),
                );
                Ok(record)
            }
            Err(err) => {
                tracing::warn!(package_id, to=%new_status, error=%err, "delivery status change rejected");
                self.audit(
                    AuditEvent::new("transition_rejected", package_id, new_status.as_str())
                        .with_error(err.to_string()),
                );
                Err(err)
            }
        }
    }

    pub fn get(&self, package_id: &str) -> Result<DeliveryRecord> {
        let bytes = self
            .records
            .get(package_id.as_bytes())?
            .ok_or_else(|| LedgerError::UnknownKey(package_id.to_string()))?;
        decode_record(&bytes)
    }

    pub fn get_status(&self, package_id: &str) -> Result<DeliveryStatus> {
        Ok(self.get(package_id)?.status)
    }

    pub fn contains(&self, package_id: &str) -> Result<bool> {
        Ok(self.records.contains_key(package_id.as_bytes())?)
    }

    /// Every record, most recently created first.
    pub fn list(&self) -> Result<Vec<DeliveryRecord>> {
        let mut out = Vec::new();
        for item in self.records.iter() {
            let (_k, v) = item?;
            out.push(decode_record(&v)?);
        }
        out.sort_by_key(|r| r.created_at);
        out.reverse();
        Ok(out)
    }

    /// Committed steps for one record, oldest first.
    pub fn history(&self, package_id: &str) -> Result<Vec<TransitionEntry>> {
        if !self.contains(package_id)? {
            return Err(LedgerError::UnknownKey(package_id.to_string()));
        }
        let mut out = Vec::new();
        for item in self.history.scan_prefix(history_prefix(package_id)) {
            let (_k, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            log.record(&event);
        }
    }
}

fn abort<T>(err: LedgerError) -> ConflictableTransactionResult<T, LedgerError> {
    Err(ConflictableTransactionError::Abort(err))
}

fn encode<T: serde::Serialize>(value: &T) -> ConflictableTransactionResult<Vec<u8>, LedgerError> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn decode_record(bytes: &[u8]) -> Result<DeliveryRecord> {
    Ok(serde_json::from_slice(bytes)?)
}

fn unwrap_tx_error(err: TransactionError<LedgerError>) -> LedgerError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => LedgerError::Storage(e),
    }
}
