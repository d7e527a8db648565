//! Storage synchronization: merge rule, engine, change bus and passive resync

mod bus;
mod engine;
mod merge;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use bus::{ChangeBus, ChangeEvent, ChangeReason, Subscription};
pub use engine::{
    RemoteWrite, SaveOutcome, SyncEngine, SyncOutcome, SyncReport, SyncSummary,
    LOCAL_ONLY_WARNING, REMOTE_ONLY_WARNING,
};
pub use merge::{merge, MergeReport};
pub use scheduler::{ResyncHandle, DEFAULT_RESYNC_INTERVAL};
