//! Page visit record used by analytics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tracked page view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub page: String,
    pub device_id: String,
    pub visited_at: DateTime<Utc>,
}

impl Visit {
    /// A visit happening now
    #[must_use]
    pub fn now(page: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            device_id: device_id.into(),
            visited_at: Utc::now(),
        }
    }
}
