//! In-memory key/value store for tests and ephemeral sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::KeyValueStore;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct MemoryStoreState {
    entries: BTreeMap<String, String>,
    failing_writes: BTreeSet<String>,
}

/// Process-local [`KeyValueStore`]; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryStoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keys currently stored, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.state().entries.keys().cloned().collect()
    }

    /// Make the next write or removal of `key` fail.
    pub fn fail_next_write(&self, key: &str) {
        self.state().failing_writes.insert(key.to_string());
    }

    fn check_write(state: &mut MemoryStoreState, key: &str) -> Result<()> {
        if state.failing_writes.remove(key) {
            return Err(Error::Io(io::Error::other(format!(
                "write to {key} rejected"
            ))));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state().entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&mut state, key)?;
        state.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_write(&mut state, key)?;
        state.entries.remove(key);
        Ok(())
    }
}
