use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle state of a package. Discriminants are the public status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeliveryStatus {
    Pending = 0,
    Dispatched = 1,
    InTransit = 2,
    Delivered = 3,
    Cancelled = 4,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Dispatched,
        DeliveryStatus::InTransit,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Dispatched => "dispatched",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// The transition table. Every mutation of a record is checked against it.
    pub fn allowed_transitions(self) -> &'static [DeliveryStatus] {
        use DeliveryStatus::*;
        match self {
            Pending => &[Dispatched, Cancelled],
            Dispatched => &[InTransit, Cancelled],
            InTransit => &[Delivered, Cancelled],
            Delivered | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown delivery status: {0}")]
pub struct ParseStatusError(pub String);

impl TryFrom<u8> for DeliveryStatus {
    type Error = ParseStatusError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| ParseStatusError(code.to_string()))
    }
}

impl FromStr for DeliveryStatus {
    type Err = ParseStatusError;

    /// Accepts the snake_case name (case-insensitive, `-` or `_`) or the numeric code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        if let Ok(code) = normalized.parse::<u8>() {
            return DeliveryStatus::try_from(code);
        }
        let compact = normalized.replace('_', "");
        DeliveryStatus::ALL
            .into_iter()
            .find(|st| st.as_str().replace('_', "") == compact)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Plaintext shipment metadata. Only ever persisted in encrypted form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMeta {
    pub sender: String,
    pub recipient: String,
    pub dispatch_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<DateTime<Utc>>,
}

impl DeliveryMeta {
    pub fn new(sender: &str, recipient: &str, dispatch_time: DateTime<Utc>) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            dispatch_time,
            delivery_time: None,
        }
    }

    pub fn delivered_at(mut self, delivery_time: DateTime<Utc>) -> Self {
        self.delivery_time = Some(delivery_time);
        self
    }
}

/// Decrypted view of a delivery as returned at the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryModel {
    pub package_id: String,
    pub status: DeliveryStatus,
    pub version: u64,
    pub meta: DeliveryMeta,
}
