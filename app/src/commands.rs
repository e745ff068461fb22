use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use codec::MetadataKey;
use parcel_track_core::{DeliveryMeta, DeliveryStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use service::DeliveryService;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub package_id: String,
    pub sender: String,
    pub recipient: String,
    pub dispatch_time: Option<String>,
    pub initial_status: DeliveryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub package_id: String,
    pub status: DeliveryStatus,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub delivery_time: Option<String>,
    pub expect_version: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub storage_path: Option<String>,
    pub audit_path: Option<String>,
    pub key_env_var: Option<String>,
    pub keychain_entry: Option<String>,
}

impl SettingsUpdate {
    fn is_empty(&self) -> bool {
        self.storage_path.is_none()
            && self.audit_path.is_none()
            && self.key_env_var.is_none()
            && self.keychain_entry.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub package_id: String,
    pub status: DeliveryStatus,
    pub code: u8,
}

impl StatusResponse {
    fn new(package_id: String, status: DeliveryStatus) -> Self {
        Self {
            package_id,
            code: status.code(),
            status,
        }
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid RFC 3339 timestamp: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

pub fn keygen(key_cfg: &config::KeyConfig, store: bool) -> Result<Value> {
    let key = MetadataKey::generate();
    if store {
        config::store_secret(&key_cfg.keychain_entry, &key.to_base64())
            .context("Failed to store metadata key in keychain")?;
        tracing::info!(entry=%key_cfg.keychain_entry, "Metadata key stored in keychain");
        return Ok(json!({ "stored_in_keychain": key_cfg.keychain_entry }));
    }
    Ok(json!({ "key": key.to_base64(), "env_var": key_cfg.env_var }))
}

/// Applies the given fields; an empty audit path turns auditing off. Key
/// sources must stay non-empty.
pub fn apply_settings(cfg: &mut config::AppConfig, update: SettingsUpdate) -> Result<()> {
    if let Some(path) = update.storage_path {
        cfg.storage.path = Some(path.trim().to_string());
    }
    if let Some(path) = update.audit_path {
        cfg.audit.path = Some(path.trim().to_string()).filter(|p| !p.is_empty());
    }
    if let Some(var) = update.key_env_var {
        anyhow::ensure!(!var.trim().is_empty(), "key env var must not be empty");
        cfg.key.env_var = var.trim().to_string();
    }
    if let Some(entry) = update.keychain_entry {
        anyhow::ensure!(!entry.trim().is_empty(), "keychain entry must not be empty");
        cfg.key.keychain_entry = entry.trim().to_string();
    }
    Ok(())
}

pub fn settings(mut cfg: config::AppConfig, update: SettingsUpdate) -> Result<Value> {
    if !update.is_empty() {
        apply_settings(&mut cfg, update)?;
        config::store(&cfg)?;
        tracing::info!("Settings updated");
    }
    Ok(serde_json::to_value(&cfg)?)
}

pub fn forget_key(key_cfg: &config::KeyConfig) -> Result<Value> {
    config::delete_secret(&key_cfg.keychain_entry)
        .context("Failed to remove metadata key from keychain")?;
    tracing::warn!(entry=%key_cfg.keychain_entry, "Metadata key removed; existing metadata is unreadable without a copy");
    Ok(json!({ "removed_from_keychain": key_cfg.keychain_entry }))
}

pub fn create(svc: &DeliveryService, req: CreateRequest) -> Result<Value> {
    let dispatch_time = match req.dispatch_time.as_deref() {
        Some(raw) => parse_time(raw)?,
        None => Utc::now(),
    };
    let meta = DeliveryMeta::new(&req.sender, &req.recipient, dispatch_time);
    let status = svc.create_delivery_at(&req.package_id, req.initial_status, &meta)?;
    tracing::info!(package_id=%req.package_id, %status, "delivery created");
    Ok(serde_json::to_value(StatusResponse::new(req.package_id, status))?)
}

/// Builds the next snapshot from the stored one; unspecified fields carry over.
pub fn update(svc: &DeliveryService, req: UpdateRequest) -> Result<Value> {
    let current = svc.get_delivery(&req.package_id)?;
    let mut meta = current.meta;
    if let Some(sender) = req.sender {
        meta.sender = sender;
    }
    if let Some(recipient) = req.recipient {
        meta.recipient = recipient;
    }
    meta.delivery_time = match (req.status, req.delivery_time.as_deref()) {
        (_, Some(raw)) => Some(parse_time(raw)?),
        (DeliveryStatus::Delivered, None) => Some(Utc::now()),
        (_, None) => None,
    };

    let status = match req.expect_version {
        Some(version) => svc.update_status_if_version(&req.package_id, version, req.status, &meta)?,
        None => svc.update_status(&req.package_id, req.status, &meta)?,
    };
    tracing::info!(package_id=%req.package_id, %status, "delivery updated");
    Ok(serde_json::to_value(StatusResponse::new(req.package_id, status))?)
}

pub fn status(svc: &DeliveryService, package_id: &str) -> Result<Value> {
    let status = svc.get_status(package_id)?;
    Ok(serde_json::to_value(StatusResponse::new(package_id.to_string(), status))?)
}

pub fn show(svc: &DeliveryService, package_id: &str) -> Result<Value> {
    Ok(serde_json::to_value(svc.get_delivery(package_id)?)?)
}

pub fn list(svc: &DeliveryService) -> Result<Value> {
    Ok(serde_json::to_value(svc.list_deliveries()?)?)
}

pub fn history(svc: &DeliveryService, package_id: &str) -> Result<Value> {
    Ok(serde_json::to_value(svc.history(package_id)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::MetadataCodec;
    use ledger::StatusLedger;

    fn service() -> DeliveryService {
        DeliveryService::new(
            StatusLedger::temporary().unwrap(),
            MetadataCodec::new(&MetadataKey::generate()),
        )
    }

    fn create_req(id: &str) -> CreateRequest {
        CreateRequest {
            package_id: id.to_string(),
            sender: "depot".to_string(),
            recipient: "shop".to_string(),
            dispatch_time: Some("2026-05-01T09:00:00Z".to_string()),
            initial_status: DeliveryStatus::Dispatched,
        }
    }

    fn update_req(id: &str, status: DeliveryStatus) -> UpdateRequest {
        UpdateRequest {
            package_id: id.to_string(),
            status,
            sender: None,
            recipient: None,
            delivery_time: None,
            expect_version: None,
        }
    }

    #[test]
    fn keygen_prints_a_usable_key() {
        let out = keygen(&config::KeyConfig::default(), false).unwrap();
        assert_eq!(out["env_var"], "PARCEL_META_KEY");
        let key = MetadataKey::from_base64(out["key"].as_str().unwrap()).unwrap();

        let codec = MetadataCodec::new(&key);
        let blob = codec.encrypt(b"meta").unwrap();
        assert_eq!(codec.decrypt(&blob).unwrap(), b"meta");
    }

    #[test]
    fn keygen_prints_a_fresh_key_each_time() {
        let a = keygen(&config::KeyConfig::default(), false).unwrap();
        let b = keygen(&config::KeyConfig::default(), false).unwrap();
        assert_ne!(a["key"], b["key"]);
    }

    #[test]
    fn settings_update_changes_only_given_fields() {
        let mut cfg = config::AppConfig::default();
        apply_settings(
            &mut cfg,
            SettingsUpdate {
                storage_path: Some(String::new()),
                audit_path: Some("audit.jsonl".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.storage.path.as_deref(), Some(""));
        assert_eq!(cfg.audit.path.as_deref(), Some("audit.jsonl"));
        assert_eq!(cfg.key.env_var, "PARCEL_META_KEY");
        assert_eq!(cfg.key.keychain_entry, "metadata_key");

        apply_settings(
            &mut cfg,
            SettingsUpdate {
                audit_path: Some(" ".to_string()),
                key_env_var: Some("DEPOT_KEY".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(cfg.audit.path.is_none());
        assert_eq!(cfg.key.env_var, "DEPOT_KEY");
    }

    #[test]
    fn settings_reject_blank_key_sources() {
        let mut cfg = config::AppConfig::default();
        let err = apply_settings(
            &mut cfg,
            SettingsUpdate {
                keychain_entry: Some("".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("keychain entry"));
        assert_eq!(cfg.key.keychain_entry, "metadata_key");
    }

    #[test]
    fn settings_without_changes_only_reports() {
        let out = settings(config::AppConfig::default(), SettingsUpdate::default()).unwrap();
        assert_eq!(out["storage"]["path"], ".parcel_ledger");
        assert_eq!(out["key"]["env_var"], "PARCEL_META_KEY");
    }

    #[test]
    fn create_then_status() {
        let svc = service();
        let out = create(&svc, create_req("PKG001")).unwrap();
        assert_eq!(out["status"], "dispatched");
        assert_eq!(out["code"], 1);
        assert_eq!(status(&svc, "PKG001").unwrap()["code"], 1);
    }

    #[test]
    fn update_carries_metadata_and_stamps_delivery() {
        let svc = service();
        create(&svc, create_req("PKG002")).unwrap();
        update(&svc, update_req("PKG002", DeliveryStatus::InTransit)).unwrap();
        let out = update(&svc, update_req("PKG002", DeliveryStatus::Delivered)).unwrap();
        assert_eq!(out["code"], 3);

        let shown = show(&svc, "PKG002").unwrap();
        assert_eq!(shown["meta"]["sender"], "depot");
        assert_eq!(shown["meta"]["recipient"], "shop");
        assert!(shown["meta"]["delivery_time"].is_string());
        assert_eq!(history(&svc, "PKG002").unwrap().as_array().unwrap().len(), 3);
    }

    #[test]
    fn bad_timestamp_is_reported() {
        let svc = service();
        let mut req = create_req("PKG003");
        req.dispatch_time = Some("yesterday".to_string());
        let err = create(&svc, req).unwrap_err();
        assert!(err.to_string().contains("Invalid RFC 3339 timestamp"));
    }

    #[test]
    fn service_errors_pass_through() {
        let svc = service();
        let err = status(&svc, "PKGZZZ").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<service::ServiceError>(),
            Some(service::ServiceError::UnknownKey(_))
        ));
    }
}
