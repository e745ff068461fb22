use crate::models::{DeliveryMeta, DeliveryStatus};

pub fn party_checks(meta: &DeliveryMeta) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();

    if meta.sender.trim().is_empty() {
        errs.push("sender is mandatory".to_string());
    }
    if meta.recipient.trim().is_empty() {
        errs.push("recipient is mandatory".to_string());
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

pub fn timestamp_checks(meta: &DeliveryMeta, status: DeliveryStatus) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();

    match (status, meta.delivery_time) {
        (DeliveryStatus::Delivered, None) => {
            errs.push("delivery time is mandatory for delivered packages".to_string());
        }
        (DeliveryStatus::Delivered, Some(delivered)) if delivered < meta.dispatch_time => {
            errs.push(format!(
                "delivery time {} precedes dispatch time {}",
                delivered.to_rfc3339(),
                meta.dispatch_time.to_rfc3339()
            ));
        }
        (DeliveryStatus::Delivered, Some(_)) => {}
        (other, Some(_)) => {
            errs.push(format!("delivery time must not be set while {other}"));
        }
        (_, None) => {}
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}
