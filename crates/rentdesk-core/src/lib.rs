//! rentdesk-core - Core library for Rentdesk
//!
//! This crate contains the dataset models, local snapshot store, remote
//! gateway and the storage synchronization engine used by Rentdesk
//! interfaces (currently the CLI).

pub mod analytics;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod resilience;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{DatasetKind, Entity, Envelope, Payload};
pub use sync::SyncEngine;
