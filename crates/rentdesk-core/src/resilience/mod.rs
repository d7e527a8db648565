//! Resilience primitives shared by the remote gateway and the sync engine

mod health;
mod retry;

pub use health::{
    ConnectionMonitor, ConnectionState, ConnectionStatus, HealthProbe, MonitorSettings,
};
pub use retry::{best_effort, with_retry, AttemptTimeout, RetryPolicy, RetryableError};
