pub mod digest;
pub mod models;
pub mod validation;

pub use models::{DeliveryMeta, DeliveryModel, DeliveryStatus, ParseStatusError};
