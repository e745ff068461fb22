use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub package_id: String,
    pub state: String,
    pub version: Option<u64>,
    pub meta_digest: Option<String>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, package_id: &str, state: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            package_id: package_id.to_string(),
            state: state.to_string(),
            version: None,
            meta_digest: None,
            error: None,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_digest(mut self, digest: String) -> Self {
        self.meta_digest = Some(digest);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Append-only JSON-lines audit file.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Failures are logged; auditing never fails the operation being audited.
    pub fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.write_event(event) {
            tracing::warn!(path=%self.path.display(), error=%e, "audit write failed");
        }
    }

    fn write_event(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        tracing::debug!(event_type=%event.event_type, package_id=%event.package_id, "audit event written");
        Ok(())
    }
}

pub fn read_audit_log(path: &Path) -> std::io::Result<Vec<AuditEvent>> {
    let raw = std::fs::read_to_string(path)?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(std::io::Error::from))
        .collect()
}
