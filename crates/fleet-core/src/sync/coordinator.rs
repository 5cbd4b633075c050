//! Pure last-write-wins state machine.
//!
//! The coordinator never performs I/O. The engine asks it what to do
//! (`begin_*`), performs the remote call, and reports back (`complete_*`).
//! The baseline is only ever replaced through these transitions.

use serde::{Deserialize, Serialize};

use crate::access::{Access, WriteAuthorization};
use crate::models::{Collection, Record, Snapshot, SyncScope};
use crate::remote::{RemoteError, RemoteResult};
use crate::state::SyncStatus;

/// Last write timestamp this client has reconciled (sent or accepted).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncBaseline(i64);

impl SyncBaseline {
    /// Treats every remote document as newer.
    pub const ZERO: Self = Self(0);

    pub const fn new(write_timestamp: i64) -> Self {
        Self(write_timestamp)
    }

    pub const fn timestamp(self) -> i64 {
        self.0
    }

    /// Apply-if-strictly-newer.
    pub const fn accepts(self, remote_timestamp: i64) -> bool {
        remote_timestamp > self.0
    }
}

/// Result of reconciling a pulled document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullOutcome {
    /// The scope holds no document yet
    Empty,
    /// The remote document replaced local state
    Applied { write_timestamp: i64 },
    /// Remote was not strictly newer; discarded
    Ignored {
        remote_timestamp: i64,
        baseline: i64,
    },
}

/// A push the engine should perform.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub scope: SyncScope,
    /// Local snapshot stamped with the new write timestamp
    pub snapshot: Snapshot,
}

impl PushRequest {
    pub const fn write_timestamp(&self) -> i64 {
        self.snapshot.write_timestamp
    }
}

#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    snapshot: Snapshot,
    baseline: SyncBaseline,
    access: Access,
    status: SyncStatus,
    last_error: Option<String>,
    pending_push: bool,
}

impl SyncCoordinator {
    pub fn new(snapshot: Snapshot, baseline: SyncBaseline, access: Access) -> Self {
        Self {
            snapshot,
            baseline,
            access,
            status: SyncStatus::Idle,
            last_error: None,
            pending_push: false,
        }
    }

    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub const fn baseline(&self) -> SyncBaseline {
        self.baseline
    }

    pub const fn access(&self) -> &Access {
        &self.access
    }

    pub const fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Local changes not yet accepted by the remote.
    pub const fn has_pending_push(&self) -> bool {
        self.pending_push
    }

    /// Apply a local edit to one collection.
    ///
    /// Returns `true` when a debounced push should be armed.
    pub fn edit_collection(
        &mut self,
        collection: Collection,
        edit: impl FnOnce(&mut Vec<Record>),
    ) -> bool {
        let mut records = self.snapshot.collection(collection).to_vec();
        edit(&mut records);
        self.snapshot.set_collection(collection, records);
        self.mark_dirty()
    }

    /// Wholesale local replacement (backup restore). Counts as a mutation.
    pub fn replace(&mut self, snapshot: &Snapshot) -> bool {
        self.overwrite_collections(snapshot);
        self.mark_dirty()
    }

    /// One-shot import: replaces the collections without touching the
    /// baseline, the scope or the push schedule.
    pub fn seed(&mut self, snapshot: &Snapshot) {
        self.overwrite_collections(snapshot);
    }

    /// Next write timestamp: `max(now, last_known + 1)`.
    pub fn next_write_timestamp(&self, now_ms: i64) -> i64 {
        let last_known = self
            .baseline
            .timestamp()
            .max(self.snapshot.write_timestamp);
        now_ms.max(last_known.saturating_add(1))
    }

    pub fn begin_push(&mut self, now_ms: i64) -> Option<PushRequest> {
        if !self.access.can_push() {
            return None;
        }
        let scope = self.access.scope.clone()?;

        let write_timestamp = self.next_write_timestamp(now_ms);
        self.status = SyncStatus::Syncing;
        self.pending_push = false;
        Some(PushRequest {
            scope,
            snapshot: self.snapshot.clone().with_timestamp(write_timestamp),
        })
    }

    pub fn complete_push(
        &mut self,
        write_timestamp: i64,
        result: RemoteResult<()>,
    ) -> RemoteResult<()> {
        match result {
            Ok(()) => {
                self.baseline = SyncBaseline::new(write_timestamp);
                self.snapshot.write_timestamp = write_timestamp;
                self.succeed();
                Ok(())
            }
            Err(error) => {
                self.pending_push = true;
                Err(self.fail(error))
            }
        }
    }

    pub fn begin_pull(&mut self) -> Option<SyncScope> {
        if !self.access.can_pull() {
            return None;
        }
        let scope = self.access.scope.clone()?;
        self.status = SyncStatus::Syncing;
        Some(scope)
    }

    pub fn complete_pull(
        &mut self,
        result: RemoteResult<Option<Snapshot>>,
    ) -> RemoteResult<PullOutcome> {
        let document = match result {
            Ok(Some(document)) => document,
            Ok(None) | Err(RemoteError::NotFound(_)) => {
                self.succeed();
                return Ok(PullOutcome::Empty);
            }
            Err(error) => return Err(self.fail(error)),
        };

        self.succeed();
        if !self.baseline.accepts(document.write_timestamp) {
            return Ok(PullOutcome::Ignored {
                remote_timestamp: document.write_timestamp,
                baseline: self.baseline.timestamp(),
            });
        }

        let write_timestamp = document.write_timestamp;
        self.baseline = SyncBaseline::new(write_timestamp);
        self.snapshot = document;
        self.pending_push = false;
        Ok(PullOutcome::Applied { write_timestamp })
    }

    /// Switch scope. The baseline resets so the new scope's document is
    /// adopted wholesale.
    ///
    /// Returns `true` when an immediate pull should follow.
    pub fn change_scope(&mut self, scope: Option<SyncScope>) -> bool {
        self.access.scope = scope;
        self.baseline = SyncBaseline::ZERO;
        self.pending_push = false;
        self.status = SyncStatus::Idle;
        self.last_error = None;
        self.access.can_pull()
    }

    pub fn set_authorization(&mut self, authorization: WriteAuthorization) {
        self.access.authorization = authorization;
        if !authorization.can_write {
            self.pending_push = false;
        }
        if !authorization.can_read {
            self.status = SyncStatus::Idle;
        }
    }

    fn overwrite_collections(&mut self, snapshot: &Snapshot) {
        for collection in Collection::ALL {
            self.snapshot
                .set_collection(collection, snapshot.collection(collection).to_vec());
        }
    }

    fn mark_dirty(&mut self) -> bool {
        if self.access.can_push() {
            self.pending_push = true;
            true
        } else {
            false
        }
    }

    fn succeed(&mut self) {
        self.status = SyncStatus::Synced;
        self.last_error = None;
    }

    fn fail(&mut self, error: RemoteError) -> RemoteError {
        self.status = SyncStatus::Error;
        self.last_error = Some(error.to_string());
        error
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn scope(raw: &str) -> SyncScope {
        SyncScope::parse(raw).unwrap()
    }

    fn access(can_write: bool, scope_name: Option<&str>) -> Access {
        Access {
            authorization: WriteAuthorization {
                can_read: true,
                can_write,
            },
            scope: scope_name.map(scope),
        }
    }

    fn with_vehicle(id: &str, write_timestamp: i64) -> Snapshot {
        Snapshot {
            vehicles: vec![json!({ "id": id })],
            ..Snapshot::default()
        }
        .with_timestamp(write_timestamp)
    }

    fn writer() -> SyncCoordinator {
        SyncCoordinator::new(
            Snapshot::default(),
            SyncBaseline::ZERO,
            access(true, Some("alpha")),
        )
    }

    #[test]
    fn write_timestamp_guards_against_clock_regression() {
        let mut coordinator = writer();
        assert_eq!(coordinator.next_write_timestamp(100), 100);

        let request = coordinator.begin_push(500).unwrap();
        coordinator
            .complete_push(request.write_timestamp(), Ok(()))
            .unwrap();

        // Clock went backwards.
        assert_eq!(coordinator.next_write_timestamp(10), 501);
    }

    #[test]
    fn successful_push_records_baseline() {
        let mut coordinator = writer();
        coordinator.edit_collection(Collection::Vehicles, |records| {
            records.push(json!({"id": "v1"}));
        });

        let request = coordinator.begin_push(100).unwrap();
        assert_eq!(coordinator.status(), SyncStatus::Syncing);
        assert_eq!(request.scope, scope("alpha"));
        assert_eq!(request.snapshot, with_vehicle("v1", 100));

        coordinator.complete_push(100, Ok(())).unwrap();
        assert_eq!(coordinator.baseline(), SyncBaseline::new(100));
        assert_eq!(coordinator.snapshot().write_timestamp, 100);
        assert_eq!(coordinator.status(), SyncStatus::Synced);
        assert!(!coordinator.has_pending_push());
    }

    #[test]
    fn failed_push_keeps_local_state_and_reports_error() {
        let mut coordinator = writer();
        assert!(coordinator.edit_collection(Collection::Logs, |records| {
            records.push(json!({"id": "l1"}));
        }));
        let before = coordinator.snapshot().clone();

        let request = coordinator.begin_push(100).unwrap();
        let error = coordinator
            .complete_push(
                request.write_timestamp(),
                Err(RemoteError::Network("offline".to_string())),
            )
            .unwrap_err();

        assert_eq!(error, RemoteError::Network("offline".to_string()));
        assert_eq!(coordinator.status(), SyncStatus::Error);
        assert_eq!(coordinator.last_error(), Some("Network error: offline"));
        assert_eq!(coordinator.snapshot(), &before);
        assert_eq!(coordinator.baseline(), SyncBaseline::ZERO);
        assert!(coordinator.has_pending_push());
    }

    #[test]
    fn read_only_principal_never_gets_a_push() {
        let mut coordinator = SyncCoordinator::new(
            Snapshot::default(),
            SyncBaseline::ZERO,
            access(false, Some("alpha")),
        );

        for index in 0..5 {
            let armed = coordinator.edit_collection(Collection::Works, |records| {
                records.push(json!({ "id": index }));
            });
            assert!(!armed);
        }
        assert!(coordinator.begin_push(100).is_none());
        assert_eq!(coordinator.begin_pull(), Some(scope("alpha")));
    }

    #[test]
    fn pull_applies_only_strictly_newer_documents() {
        // Scenario A: fresh client adopts the remote document.
        let mut fresh = writer();
        fresh.begin_pull().unwrap();
        let outcome = fresh.complete_pull(Ok(Some(with_vehicle("v1", 100)))).unwrap();
        assert_eq!(
            outcome,
            PullOutcome::Applied {
                write_timestamp: 100
            }
        );
        assert_eq!(fresh.snapshot(), &with_vehicle("v1", 100));
        assert_eq!(fresh.baseline().timestamp(), 100);

        // Scenario B: stale remote document is discarded.
        let mut ahead = SyncCoordinator::new(
            with_vehicle("mine", 150),
            SyncBaseline::new(150),
            access(true, Some("alpha")),
        );
        ahead.begin_pull().unwrap();
        let outcome = ahead.complete_pull(Ok(Some(with_vehicle("v1", 100)))).unwrap();
        assert_eq!(
            outcome,
            PullOutcome::Ignored {
                remote_timestamp: 100,
                baseline: 150
            }
        );
        assert_eq!(ahead.snapshot(), &with_vehicle("mine", 150));
        assert_eq!(ahead.baseline().timestamp(), 150);
    }

    #[test]
    fn own_echo_is_not_reapplied() {
        let mut coordinator = writer();
        coordinator.edit_collection(Collection::Vehicles, |records| {
            records.push(json!({"id": "v1"}));
        });
        let request = coordinator.begin_push(100).unwrap();
        coordinator.complete_push(100, Ok(())).unwrap();

        coordinator.begin_pull().unwrap();
        let outcome = coordinator.complete_pull(Ok(Some(request.snapshot))).unwrap();
        assert!(matches!(outcome, PullOutcome::Ignored { .. }));
    }

    #[test]
    fn applied_baselines_never_decrease() {
        let mut coordinator = writer();
        let mut applied = Vec::new();
        for remote_timestamp in [100, 90, 100, 250, 120, 251] {
            coordinator.begin_pull().unwrap();
            coordinator
                .complete_pull(Ok(Some(with_vehicle("v", remote_timestamp))))
                .unwrap();
            applied.push(coordinator.baseline().timestamp());
        }
        assert_eq!(applied, vec![100, 100, 100, 250, 250, 251]);
    }

    #[test]
    fn not_found_is_an_empty_result() {
        let mut coordinator = writer();
        coordinator.begin_pull().unwrap();
        let outcome = coordinator
            .complete_pull(Err(RemoteError::NotFound("alpha".to_string())))
            .unwrap();
        assert_eq!(outcome, PullOutcome::Empty);
        assert_eq!(coordinator.status(), SyncStatus::Synced);
    }

    #[test]
    fn pull_failure_sets_error_status() {
        let mut coordinator = writer();
        coordinator.begin_pull().unwrap();
        assert!(coordinator
            .complete_pull(Err(RemoteError::Auth("expired".to_string())))
            .is_err());
        assert_eq!(coordinator.status(), SyncStatus::Error);
        assert!(coordinator.last_error().unwrap().contains("expired"));
    }

    #[test]
    fn scope_change_resets_baseline_and_requests_pull() {
        let mut coordinator = SyncCoordinator::new(
            Snapshot::default(),
            SyncBaseline::new(150),
            access(true, Some("alpha")),
        );

        assert!(coordinator.change_scope(Some(scope("beta"))));
        assert_eq!(coordinator.baseline(), SyncBaseline::ZERO);
        assert_eq!(coordinator.begin_pull(), Some(scope("beta")));

        assert!(!coordinator.change_scope(None));
        assert!(coordinator.begin_pull().is_none());
    }

    #[test]
    fn seed_does_not_schedule_a_push() {
        let mut coordinator = writer();
        coordinator.seed(&with_vehicle("imported", 999));

        assert!(!coordinator.has_pending_push());
        assert_eq!(coordinator.snapshot().vehicles, vec![json!({"id": "imported"})]);
        assert_eq!(coordinator.snapshot().write_timestamp, 0);
        assert_eq!(coordinator.baseline(), SyncBaseline::ZERO);
    }

    #[test]
    fn replace_counts_as_a_mutation() {
        let mut coordinator = writer();
        assert!(coordinator.replace(&with_vehicle("restored", 5)));
        assert!(coordinator.has_pending_push());
        assert_eq!(coordinator.snapshot().vehicles, vec![json!({"id": "restored"})]);
    }

    #[test]
    fn losing_read_access_returns_to_idle() {
        let mut coordinator = writer();
        coordinator.begin_pull().unwrap();
        coordinator.complete_pull(Ok(None)).unwrap();
        assert_eq!(coordinator.status(), SyncStatus::Synced);

        coordinator.set_authorization(WriteAuthorization::DENIED);
        assert_eq!(coordinator.status(), SyncStatus::Idle);
        assert!(coordinator.begin_pull().is_none());
        assert!(coordinator.begin_push(1).is_none());
    }
}
