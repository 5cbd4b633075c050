//! In-process remote store for tests and offline demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::models::{Snapshot, SyncScope};

#[derive(Debug, Default)]
struct MemoryRemoteState {
    documents: HashMap<SyncScope, Snapshot>,
    pulls: HashMap<SyncScope, usize>,
    pushes: Vec<(SyncScope, Snapshot)>,
    next_push_error: Option<RemoteError>,
    next_pull_error: Option<RemoteError>,
    created: usize,
}

/// Shared map of scope to snapshot; clones observe the same documents.
///
/// Every call is recorded so tests can assert on traffic.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryRemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryRemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current document stored for `scope`.
    pub fn document(&self, scope: &SyncScope) -> Option<Snapshot> {
        self.state().documents.get(scope).cloned()
    }

    /// Store a document directly, bypassing push accounting.
    pub fn insert(&self, scope: &SyncScope, snapshot: Snapshot) {
        self.state().documents.insert(scope.clone(), snapshot);
    }

    /// Every successful push, in order.
    pub fn pushes(&self) -> Vec<(SyncScope, Snapshot)> {
        self.state().pushes.clone()
    }

    pub fn push_count(&self) -> usize {
        self.state().pushes.len()
    }

    /// Number of pulls attempted against `scope`, including failed ones.
    pub fn pull_count(&self, scope: &SyncScope) -> usize {
        self.state().pulls.get(scope).copied().unwrap_or(0)
    }

    /// Make the next push fail with `error`.
    pub fn fail_next_push(&self, error: RemoteError) {
        self.state().next_push_error = Some(error);
    }

    /// Make the next pull fail with `error`.
    pub fn fail_next_pull(&self, error: RemoteError) {
        self.state().next_pull_error = Some(error);
    }
}

impl RemoteStore for MemoryRemote {
    async fn pull(&self, scope: &SyncScope) -> RemoteResult<Option<Snapshot>> {
        let mut state = self.state();
        *state.pulls.entry(scope.clone()).or_default() += 1;
        if let Some(error) = state.next_pull_error.take() {
            return Err(error);
        }
        Ok(state.documents.get(scope).cloned())
    }

    async fn push(&self, scope: &SyncScope, snapshot: &Snapshot) -> RemoteResult<()> {
        let mut state = self.state();
        if let Some(error) = state.next_push_error.take() {
            return Err(error);
        }
        state.documents.insert(scope.clone(), snapshot.clone());
        state.pushes.push((scope.clone(), snapshot.clone()));
        Ok(())
    }

    async fn create_scope(&self, initial: &Snapshot) -> RemoteResult<SyncScope> {
        let mut state = self.state();
        state.created += 1;
        let scope = SyncScope::parse(&format!("memory-{}", state.created))
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        state.documents.insert(scope.clone(), initial.clone());
        Ok(scope)
    }
}
