//! fleet-core - Core library for Fleet Sync
//!
//! This crate contains the snapshot model, the local persistent store, the
//! remote store adapters and the last-write-wins sync engine shared by the
//! CLI and the API server.

pub mod access;
pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod remote;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use access::{AccessGate, Role, Session, WriteAuthorization, WritePolicy};
pub use error::{Error, Result};
pub use models::{Collection, Record, Snapshot, SyncScope};
pub use state::SyncStatus;
pub use sync::{SyncEngine, SyncHandle};
