use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "parcel-tracker";
const KEYCHAIN_SERVICE: &str = "parcel.tracker.keys";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub key: KeyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Ledger directory. `None` keeps records in a temporary store.
    #[serde(default = "default_storage_path")]
    pub path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> Option<String> {
    Some(".parcel_ledger".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditConfig {
    pub path: Option<String>,
}

/// Where the metadata key is provisioned from. Key material itself is never
/// written to the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default = "default_key_env_var")]
    pub env_var: String,
    #[serde(default = "default_keychain_entry")]
    pub keychain_entry: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            env_var: default_key_env_var(),
            keychain_entry: default_keychain_entry(),
        }
    }
}

fn default_key_env_var() -> String {
    "PARCEL_META_KEY".to_string()
}

fn default_keychain_entry() -> String {
    "metadata_key".to_string()
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

/// Encoded metadata key: the configured environment variable first, then the keychain.
pub fn metadata_key_secret(key_cfg: &KeyConfig) -> Result<String> {
    lookup_key_secret(key_cfg, |name| std::env::var(name).ok(), get_secret)
}

fn lookup_key_secret<E, K>(key_cfg: &KeyConfig, env: E, keychain: K) -> Result<String>
where
    E: Fn(&str) -> Option<String>,
    K: Fn(&str) -> Result<String>,
{
    if let Some(value) = env(&key_cfg.env_var).filter(|v| !v.trim().is_empty()) {
        return Ok(value);
    }
    keychain(&key_cfg.keychain_entry).map_err(|e| {
        anyhow!(
            "metadata key not found in ${} or keychain entry {:?}: {e}",
            key_cfg.env_var,
            key_cfg.keychain_entry
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.storage.path.as_deref(), Some(".parcel_ledger"));
        assert!(cfg.audit.path.is_none());
        assert_eq!(cfg.key.env_var, "PARCEL_META_KEY");
        assert_eq!(cfg.key.keychain_entry, "metadata_key");
    }

    #[test]
    fn explicit_null_storage_means_temporary() {
        let cfg: AppConfig = serde_json::from_str(r#"{"storage":{"path":null}}"#).unwrap();
        assert!(cfg.storage.path.is_none());
    }

    #[test]
    fn environment_wins_over_keychain() {
        let cfg = KeyConfig::default();
        let secret = lookup_key_secret(
            &cfg,
            |name| (name == "PARCEL_META_KEY").then(|| "from-env".to_string()),
            |_| Ok("from-keychain".to_string()),
        )
        .unwrap();
        assert_eq!(secret, "from-env");
    }

    #[test]
    fn blank_environment_falls_back_to_keychain() {
        let cfg = KeyConfig::default();
        let secret = lookup_key_secret(
            &cfg,
            |_| Some("  ".to_string()),
            |entry| Ok(format!("keychain:{entry}")),
        )
        .unwrap();
        assert_eq!(secret, "keychain:metadata_key");
    }

    #[test]
    fn missing_everywhere_names_both_sources() {
        let cfg = KeyConfig::default();
        let err = lookup_key_secret(&cfg, |_| None, |_| Err(anyhow!("no entry")))
            .unwrap_err()
            .to_string();
        assert!(err.contains("$PARCEL_META_KEY"));
        assert!(err.contains("metadata_key"));
    }
}
