//! Writer identity stamped onto envelopes

use uuid::Uuid;

/// Identifies who wrote a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable per-installation identifier (persisted locally)
    pub device_id: String,
    /// Ephemeral per-process identifier
    pub session_id: String,
}

impl DeviceIdentity {
    /// Identity for a known device with a fresh session
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Generate a new device id (used once per installation)
    #[must_use]
    pub fn generate_device_id() -> String {
        Uuid::now_v7().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_differ_for_same_device() {
        let first = DeviceIdentity::new("device");
        let second = DeviceIdentity::new("device");
        assert_eq!(first.device_id, second.device_id);
        assert_ne!(first.session_id, second.session_id);
    }
}
