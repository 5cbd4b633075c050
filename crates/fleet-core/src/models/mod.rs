//! Data models for Fleet Sync

mod scope;
mod snapshot;

pub use scope::SyncScope;
pub use snapshot::{Collection, Record, Snapshot};
