//! Sync coordinator and the engine that drives it.

mod coordinator;
mod engine;

pub use coordinator::{PullOutcome, PushRequest, SyncBaseline, SyncCoordinator};
pub use engine::{EngineOptions, SyncEngine, SyncEvent, SyncHandle, SyncReport, SyncState};
