mod rules;

use crate::models::{DeliveryMeta, DeliveryStatus};

/// Checks a metadata snapshot against the status it will be stored under.
/// Returns every violated rule, not just the first.
pub fn validate(meta: &DeliveryMeta, status: DeliveryStatus) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();
    if let Err(mut re) = rules::party_checks(meta) {
        errs.append(&mut re);
    }
    if let Err(mut re) = rules::timestamp_checks(meta, status) {
        errs.append(&mut re);
    }
    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

/// Package ids must be non-empty and free of surrounding whitespace or NUL bytes.
pub fn validate_package_id(package_id: &str) -> Result<(), String> {
    if package_id.is_empty() {
        return Err("package id must not be empty".to_string());
    }
    if package_id.trim() != package_id {
        return Err(format!("package id {package_id:?} has surrounding whitespace"));
    }
    if package_id.contains('\0') {
        return Err("package id must not contain NUL".to_string());
    }
    Ok(())
}
