//! Core engine: background sync and the snapshot store it feeds.

pub mod scheduler;
pub mod store;

pub use scheduler::{SyncConfig, SyncConfigUpdate, SyncScheduler, SyncTarget};
pub use store::{AdapterSyncTarget, OpportunityStore, Snapshot};
