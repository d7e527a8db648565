//! Data models for Rentdesk storage sync

mod dataset;
mod entity;
mod envelope;
mod identity;
mod visit;

pub use dataset::{DatasetKind, ParseDatasetKindError};
pub(crate) use entity::json_type_name;
pub use entity::{Entity, Payload};
pub use envelope::Envelope;
pub use identity::DeviceIdentity;
pub use visit::Visit;
