//! Dataset kind model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The logical collections kept in sync between this device and the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Guest bookings
    Reservations,
    /// Cleaning board tasks
    CleaningTasks,
    /// Rental units
    Apartments,
    /// Aggregate price sheet (singleton-style)
    Prices,
}

/// Returned when a string does not name a dataset kind
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown dataset kind '{0}' (expected reservations, cleaning-tasks, apartments or prices)")]
pub struct ParseDatasetKindError(String);

impl DatasetKind {
    /// Every dataset kind, in synchronization order
    pub const ALL: [Self; 4] = [
        Self::Reservations,
        Self::CleaningTasks,
        Self::Apartments,
        Self::Prices,
    ];

    /// Stable snake-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reservations => "reservations",
            Self::CleaningTasks => "cleaning_tasks",
            Self::Apartments => "apartments",
            Self::Prices => "prices",
        }
    }

    /// Remote table backing this dataset
    #[must_use]
    pub const fn table(self) -> &'static str {
        self.as_str()
    }

    /// Key of the durable local entry holding this dataset's envelope
    #[must_use]
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::Reservations => "rentdesk.reservations",
            Self::CleaningTasks => "rentdesk.cleaning_tasks",
            Self::Apartments => "rentdesk.apartments",
            Self::Prices => "rentdesk.prices",
        }
    }

    /// Whether the payload is a homogeneous collection (otherwise a single object)
    #[must_use]
    pub const fn is_collection(self) -> bool {
        !matches!(self, Self::Prices)
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = ParseDatasetKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ParseDatasetKindError(s.to_string()))
    }
}
