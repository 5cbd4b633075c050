//! Single-owner sync actor.
//!
//! One tokio task owns the [`SyncCoordinator`], the local store, the remote
//! adapter and both timers. Callers talk to it through a cloneable
//! [`SyncHandle`]; status is published on a `watch` channel and notable
//! transitions on a `broadcast` channel.
//!
//! Remote calls are awaited inline, so a push is never issued while another
//! is outstanding.

use std::future::pending;
use std::ops::ControlFlow;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use super::coordinator::{PullOutcome, SyncBaseline, SyncCoordinator};
use crate::access::{AccessGate, Session, WriteAuthorization};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{Collection, Record, Snapshot, SyncScope};
use crate::remote::{RemoteError, RemoteStore};
use crate::state::SyncStatus;
use crate::store::{KeyValueStore, SnapshotStore};
use crate::util::unix_millis_now;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Timer settings for a running engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub debounce: Duration,
    pub poll_interval: Duration,
    /// Wall clock in Unix milliseconds, used to stamp pushes
    pub clock: fn() -> i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl EngineOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            debounce: config.debounce,
            poll_interval: config.poll_interval,
            clock: unix_millis_now,
        }
    }
}

/// Notable engine transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Pushed {
        scope: SyncScope,
        write_timestamp: i64,
    },
    PushFailed {
        scope: SyncScope,
        error: RemoteError,
    },
    Pulled {
        scope: SyncScope,
        outcome: PullOutcome,
    },
    PullFailed {
        scope: SyncScope,
        error: RemoteError,
    },
    ScopeChanged {
        scope: Option<SyncScope>,
    },
    Seeded,
}

/// Result of an explicitly requested sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncReport {
    Pushed { write_timestamp: i64 },
    Pulled { outcome: PullOutcome },
    /// Not permitted for this session or no scope is set
    Skipped,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub scope: Option<SyncScope>,
    pub baseline: i64,
    pub write_timestamp: i64,
    pub authorization: WriteAuthorization,
    pub pending_push: bool,
    pub last_error: Option<String>,
}

type Edit = Box<dyn FnOnce(&mut Vec<Record>) + Send>;

enum Command {
    Mutate {
        collection: Collection,
        edit: Edit,
        reply: oneshot::Sender<Result<()>>,
    },
    Replace {
        snapshot: Box<Snapshot>,
        reply: oneshot::Sender<Result<()>>,
    },
    Seed {
        snapshot: Box<Snapshot>,
        reply: oneshot::Sender<Result<()>>,
    },
    SetScope {
        scope: Option<SyncScope>,
        reply: oneshot::Sender<Result<Option<PullOutcome>>>,
    },
    SetSession {
        session: Box<Session>,
        reply: oneshot::Sender<Result<Option<PullOutcome>>>,
    },
    Flush {
        reply: oneshot::Sender<Result<SyncReport>>,
    },
    PullNow {
        reply: oneshot::Sender<Result<SyncReport>>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    State {
        reply: oneshot::Sender<SyncState>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable client of a running [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)
    }

    /// Edit one collection in place. The change is persisted immediately and
    /// a debounced push is armed when the session may write.
    pub async fn mutate(
        &self,
        collection: Collection,
        edit: impl FnOnce(&mut Vec<Record>) + Send + 'static,
    ) -> Result<()> {
        self.request(|reply| Command::Mutate {
            collection,
            edit: Box::new(edit),
            reply,
        })
        .await?
    }

    pub async fn set_collection(&self, collection: Collection, records: Vec<Record>) -> Result<()> {
        self.mutate(collection, move |current| *current = records)
            .await
    }

    /// Restore from backup. Behaves like a mutation of every collection.
    pub async fn replace(&self, snapshot: Snapshot) -> Result<()> {
        self.request(|reply| Command::Replace {
            snapshot: Box::new(snapshot),
            reply,
        })
        .await?
    }

    /// One-shot import; never arms a push and never touches scope or baseline.
    pub async fn seed(&self, snapshot: Snapshot) -> Result<()> {
        self.request(|reply| Command::Seed {
            snapshot: Box::new(snapshot),
            reply,
        })
        .await?
    }

    /// Join a scope: resets the baseline and pulls immediately.
    pub async fn set_scope(&self, scope: SyncScope) -> Result<Option<PullOutcome>> {
        self.request(|reply| Command::SetScope {
            scope: Some(scope),
            reply,
        })
        .await?
    }

    /// Disconnect sync. Both timers are cancelled.
    pub async fn clear_scope(&self) -> Result<()> {
        self.request(|reply| Command::SetScope { scope: None, reply })
            .await?
            .map(|_| ())
    }

    pub async fn set_session(&self, session: Session) -> Result<Option<PullOutcome>> {
        self.request(|reply| Command::SetSession {
            session: Box::new(session),
            reply,
        })
        .await?
    }

    /// Push now, skipping any pending debounce.
    pub async fn flush(&self) -> Result<SyncReport> {
        self.request(|reply| Command::Flush { reply }).await?
    }

    pub async fn pull_now(&self) -> Result<SyncReport> {
        self.request(|reply| Command::PullNow { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn state(&self) -> Result<SyncState> {
        self.request(|reply| Command::State { reply }).await
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn current_status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop the engine and cancel its timers. Pending pushes are not flushed.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Debounce deadline and poll timer; dropping either cancels it.
#[derive(Debug, Default)]
struct Schedule {
    push_at: Option<Instant>,
    poll: Option<Interval>,
}

impl Schedule {
    fn cancel(&mut self) {
        self.push_at = None;
        self.poll = None;
    }
}

pub struct SyncEngine<S, R> {
    coordinator: SyncCoordinator,
    store: SnapshotStore<S>,
    remote: R,
    gate: AccessGate,
    options: EngineOptions,
    schedule: Schedule,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
}

impl<S: KeyValueStore, R: RemoteStore> SyncEngine<S, R> {
    /// Load local state, resolve the session's access and spawn the engine.
    ///
    /// When the session may read a scope, the first poll fires immediately.
    pub async fn start(
        options: EngineOptions,
        gate: AccessGate,
        session: Session,
        remote: R,
        store: SnapshotStore<S>,
    ) -> SyncHandle {
        let snapshot = store.load_snapshot().await;
        let stored_scope = store.load_scope().await;
        let mut baseline = store.load_baseline().await;

        remote.set_credential(session.credential.as_deref());
        let access = gate.evaluate(&session, stored_scope.as_ref());
        if access.scope != stored_scope {
            baseline = SyncBaseline::ZERO;
            if let Err(error) = store.save_scope(access.scope.as_ref()).await {
                tracing::warn!("Failed to persist sync scope: {}", error);
            }
            if let Err(error) = store.save_baseline(baseline).await {
                tracing::warn!("Failed to persist sync baseline: {}", error);
            }
        }

        tracing::debug!(
            "Starting sync engine (role={}, scope={:?}, baseline={})",
            session.role,
            access.scope,
            baseline.timestamp()
        );

        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (status, status_rx) = watch::channel(SyncStatus::Idle);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let mut engine = Self {
            coordinator: SyncCoordinator::new(snapshot, baseline, access),
            store,
            remote,
            gate,
            options,
            schedule: Schedule::default(),
            status,
            events: events.clone(),
        };
        engine.arm_poll(true);
        tokio::spawn(engine.run(receiver));

        SyncHandle {
            commands,
            status: status_rx,
            events,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let push_at = self.schedule.push_at;
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
                () = wait_until(push_at) => {
                    self.schedule.push_at = None;
                    tracing::debug!("Debounce elapsed");
                    // Failures are already recorded as status and logged.
                    let _ = self.push().await;
                }
                () = next_tick(&mut self.schedule.poll) => {
                    tracing::debug!("Poll tick");
                    let _ = self.pull().await;
                }
            }
        }

        self.schedule.cancel();
        tracing::debug!("Sync engine stopped");
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Mutate {
                collection,
                edit,
                reply,
            } => {
                let _ = reply.send(self.mutate(collection, edit).await);
            }
            Command::Replace { snapshot, reply } => {
                let _ = reply.send(self.replace(&snapshot).await);
            }
            Command::Seed { snapshot, reply } => {
                let _ = reply.send(self.seed(&snapshot).await);
            }
            Command::SetScope { scope, reply } => {
                let _ = reply.send(self.change_scope(scope).await);
            }
            Command::SetSession { session, reply } => {
                let _ = reply.send(self.set_session(&session).await);
            }
            Command::Flush { reply } => {
                self.schedule.push_at = None;
                let _ = reply.send(self.push().await);
            }
            Command::PullNow { reply } => {
                let _ = reply.send(self.pull().await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.coordinator.snapshot().clone());
            }
            Command::State { reply } => {
                let _ = reply.send(self.state());
            }
            Command::Shutdown { reply } => {
                self.schedule.cancel();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Local edits reach the store before a push is armed; a failed write
    /// leaves the engine as it was.
    async fn mutate(&mut self, collection: Collection, edit: Edit) -> Result<()> {
        let previous = self.coordinator.clone();
        let armed = self.coordinator.edit_collection(collection, edit);
        let saved = self
            .store
            .save_collection(collection, self.coordinator.snapshot().collection(collection))
            .await;
        if let Err(error) = saved {
            tracing::warn!("Discarding edit to {}: {}", collection, error);
            self.coordinator = previous;
            return Err(error);
        }
        self.arm_push(armed);
        Ok(())
    }

    async fn replace(&mut self, snapshot: &Snapshot) -> Result<()> {
        let previous = self.coordinator.clone();
        let armed = self.coordinator.replace(snapshot);
        if let Err(error) = self.store.save(self.coordinator.snapshot()).await {
            tracing::warn!("Discarding snapshot replacement: {}", error);
            self.coordinator = previous;
            // Collections written before the failure are put back.
            if let Err(restore_error) = self.store.save(self.coordinator.snapshot()).await {
                tracing::warn!("Failed to restore local snapshot: {}", restore_error);
            }
            return Err(error);
        }
        self.arm_push(armed);
        Ok(())
    }

    async fn seed(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.coordinator.seed(snapshot);
        self.emit(SyncEvent::Seeded);
        tracing::info!("Imported snapshot into local store");
        self.store.save(self.coordinator.snapshot()).await
    }

    async fn change_scope(&mut self, scope: Option<SyncScope>) -> Result<Option<PullOutcome>> {
        let pull_now = self.coordinator.change_scope(scope.clone());
        self.schedule.cancel();
        self.publish_status();

        match &scope {
            Some(scope) => tracing::info!("Sync scope set to {}", scope),
            None => tracing::info!("Sync scope cleared"),
        }
        self.arm_poll(false);

        // Persistence failures never stop the poll armed above.
        if let Err(error) = self.store.save_scope(scope.as_ref()).await {
            tracing::warn!("Failed to persist sync scope: {}", error);
        }
        if let Err(error) = self.store.save_baseline(SyncBaseline::ZERO).await {
            tracing::warn!("Failed to persist sync baseline: {}", error);
        }
        self.emit(SyncEvent::ScopeChanged { scope });

        if !pull_now {
            return Ok(None);
        }
        match self.pull().await? {
            SyncReport::Pulled { outcome } => Ok(Some(outcome)),
            SyncReport::Pushed { .. } | SyncReport::Skipped => Ok(None),
        }
    }

    async fn set_session(&mut self, session: &Session) -> Result<Option<PullOutcome>> {
        self.remote.set_credential(session.credential.as_deref());

        let current_scope = self.coordinator.access().scope.clone();
        let was_polling = self.coordinator.access().can_pull();
        let access = self.gate.evaluate(session, current_scope.as_ref());
        self.coordinator.set_authorization(access.authorization);

        if !access.authorization.can_write {
            self.schedule.push_at = None;
        }
        if !access.authorization.can_read {
            tracing::info!("Session ended; sync timers cancelled");
            self.schedule.cancel();
        }
        self.publish_status();

        if access.scope != current_scope {
            return self.change_scope(access.scope).await;
        }
        if !was_polling {
            self.arm_poll(true);
        }
        Ok(None)
    }

    async fn push(&mut self) -> Result<SyncReport> {
        let now = (self.options.clock)();
        let Some(request) = self.coordinator.begin_push(now) else {
            tracing::debug!("Push skipped: no scope or no write access");
            return Ok(SyncReport::Skipped);
        };
        self.publish_status();

        let write_timestamp = request.write_timestamp();
        let result = self.remote.push(&request.scope, &request.snapshot).await;
        let result = self.coordinator.complete_push(write_timestamp, result);
        self.publish_status();

        match result {
            Ok(()) => {
                tracing::info!(
                    "Pushed snapshot to scope {} at {}",
                    request.scope,
                    write_timestamp
                );
                self.persist_sync_metadata().await;
                self.emit(SyncEvent::Pushed {
                    scope: request.scope,
                    write_timestamp,
                });
                Ok(SyncReport::Pushed { write_timestamp })
            }
            Err(error) => {
                tracing::warn!("Push to scope {} failed: {}", request.scope, error);
                self.emit(SyncEvent::PushFailed {
                    scope: request.scope,
                    error: error.clone(),
                });
                Err(error.into())
            }
        }
    }

    async fn pull(&mut self) -> Result<SyncReport> {
        let Some(scope) = self.coordinator.begin_pull() else {
            return Ok(SyncReport::Skipped);
        };
        self.publish_status();

        let result = self.remote.pull(&scope).await;
        let result = self.coordinator.complete_pull(result);
        self.publish_status();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!("Pull from scope {} failed: {}", scope, error);
                self.emit(SyncEvent::PullFailed {
                    scope,
                    error: error.clone(),
                });
                return Err(error.into());
            }
        };

        match outcome {
            PullOutcome::Applied { write_timestamp } => {
                tracing::info!(
                    "Applied remote snapshot from scope {} at {}",
                    scope,
                    write_timestamp
                );
                self.schedule.push_at = None;
                if let Err(error) = self.store.save(self.coordinator.snapshot()).await {
                    tracing::warn!("Failed to persist pulled snapshot: {}", error);
                }
                self.persist_sync_metadata().await;
            }
            PullOutcome::Ignored {
                remote_timestamp,
                baseline,
            } => {
                tracing::debug!(
                    "Ignored remote snapshot at {} (baseline {})",
                    remote_timestamp,
                    baseline
                );
            }
            PullOutcome::Empty => {
                tracing::debug!("Scope {} has no remote snapshot yet", scope);
            }
        }

        self.emit(SyncEvent::Pulled { scope, outcome });
        Ok(SyncReport::Pulled { outcome })
    }

    async fn persist_sync_metadata(&self) {
        let write_timestamp = self.coordinator.snapshot().write_timestamp;
        if let Err(error) = self.store.save_write_timestamp(write_timestamp).await {
            tracing::warn!("Failed to persist write timestamp: {}", error);
        }
        if let Err(error) = self.store.save_baseline(self.coordinator.baseline()).await {
            tracing::warn!("Failed to persist sync baseline: {}", error);
        }
    }

    /// Restart the trailing debounce window.
    fn arm_push(&mut self, armed: bool) {
        if armed {
            self.schedule.push_at = Some(Instant::now() + self.options.debounce);
            tracing::debug!("Push scheduled in {:?}", self.options.debounce);
        }
    }

    fn arm_poll(&mut self, immediate: bool) {
        if !self.coordinator.access().can_pull() {
            self.schedule.poll = None;
            return;
        }

        let period = self.options.poll_interval;
        let start = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut poll = interval_at(start, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.schedule.poll = Some(poll);
    }

    fn state(&self) -> SyncState {
        let coordinator = &self.coordinator;
        SyncState {
            status: coordinator.status(),
            scope: coordinator.access().scope.clone(),
            baseline: coordinator.baseline().timestamp(),
            write_timestamp: coordinator.snapshot().write_timestamp,
            authorization: coordinator.access().authorization,
            pending_push: coordinator.has_pending_push(),
            last_error: coordinator.last_error().map(ToString::to_string),
        }
    }

    fn publish_status(&self) {
        let status = self.coordinator.status();
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(poll) => {
            poll.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::sleep;

    use super::*;
    use crate::access::{Role, WritePolicy};
    use crate::remote::MemoryRemote;
    use crate::store::MemoryStore;

    const DEBOUNCE: Duration = Duration::from_secs(2);
    const POLL: Duration = Duration::from_secs(10);

    fn at_100() -> i64 {
        100
    }

    fn scope(raw: &str) -> SyncScope {
        SyncScope::parse(raw).unwrap()
    }

    fn options(clock: fn() -> i64) -> EngineOptions {
        EngineOptions {
            debounce: DEBOUNCE,
            poll_interval: POLL,
            clock,
        }
    }

    fn admin(scope_name: &str) -> Session {
        Session::new(Role::Admin, "admin").with_scope(scope(scope_name))
    }

    fn worker(scope_name: &str) -> Session {
        Session::new(Role::Worker, "driver").with_scope(scope(scope_name))
    }

    async fn start(remote: &MemoryRemote, session: Session, policy: WritePolicy) -> SyncHandle {
        start_with(remote, MemoryStore::new(), session, policy, at_100).await
    }

    async fn start_with(
        remote: &MemoryRemote,
        store: MemoryStore,
        session: Session,
        policy: WritePolicy,
        clock: fn() -> i64,
    ) -> SyncHandle {
        SyncEngine::start(
            options(clock),
            AccessGate::new(policy),
            session,
            remote.clone(),
            SnapshotStore::new(store),
        )
        .await
    }

    fn records(ids: &[&str]) -> Vec<Record> {
        ids.iter().map(|id| json!({ "id": id })).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_coalesce_into_one_push() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AdminOnly).await;
        let mut events = handle.subscribe();

        for id in ["v1", "v2", "v3"] {
            handle
                .mutate(Collection::Vehicles, move |records| {
                    records.push(json!({ "id": id }));
                })
                .await
                .unwrap();
            sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(remote.push_count(), 0);

        sleep(DEBOUNCE).await;

        let pushes = remote.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, scope("alpha"));
        assert_eq!(pushes[0].1.vehicles, records(&["v1", "v2", "v3"]));
        assert_eq!(handle.current_status(), SyncStatus::Synced);

        let mut pushed = None;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::Pushed {
                write_timestamp, ..
            } = event
            {
                pushed = Some(write_timestamp);
            }
        }
        assert_eq!(pushed, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn read_only_principal_never_pushes_but_receives_pulls() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, worker("alpha"), WritePolicy::AdminOnly).await;

        for id in ["w1", "w2"] {
            handle
                .set_collection(Collection::Workers, records(&[id]))
                .await
                .unwrap();
        }
        handle.flush().await.unwrap();
        sleep(DEBOUNCE * 3).await;
        assert_eq!(remote.push_count(), 0);

        let document = Snapshot {
            vehicles: records(&["remote"]),
            ..Snapshot::default()
        }
        .with_timestamp(500);
        remote.insert(&scope("alpha"), document.clone());
        sleep(POLL).await;

        assert_eq!(handle.snapshot().await.unwrap(), document);
        assert_eq!(handle.state().await.unwrap().baseline, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn own_push_is_not_reapplied_on_poll() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;

        handle
            .set_collection(Collection::Vehicles, records(&["v1"]))
            .await
            .unwrap();
        assert_eq!(
            handle.flush().await.unwrap(),
            SyncReport::Pushed {
                write_timestamp: 100
            }
        );
        assert_eq!(
            handle.pull_now().await.unwrap(),
            SyncReport::Pulled {
                outcome: PullOutcome::Ignored {
                    remote_timestamp: 100,
                    baseline: 100
                }
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_scopes_do_not_see_each_other() {
        let remote = MemoryRemote::new();
        let alpha = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;
        let beta = start(&remote, admin("beta"), WritePolicy::AnyAuthenticated).await;

        alpha
            .set_collection(Collection::Vehicles, records(&["secret"]))
            .await
            .unwrap();
        alpha.flush().await.unwrap();

        assert_eq!(
            beta.pull_now().await.unwrap(),
            SyncReport::Pulled {
                outcome: PullOutcome::Empty
            }
        );
        assert!(beta.snapshot().await.unwrap().vehicles.is_empty());
        assert!(remote.document(&scope("beta")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_client_adopts_pushed_snapshot() {
        let remote = MemoryRemote::new();
        let writer = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;
        writer
            .set_collection(Collection::Vehicles, records(&["v1"]))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        let reader = start(&remote, worker("alpha"), WritePolicy::AdminOnly).await;
        reader.pull_now().await.unwrap();

        let snapshot = reader.snapshot().await.unwrap();
        assert_eq!(snapshot.vehicles, records(&["v1"]));
        assert_eq!(reader.state().await.unwrap().baseline, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_remote_snapshot_is_discarded() {
        let remote = MemoryRemote::new();
        remote.insert(
            &scope("alpha"),
            Snapshot {
                vehicles: records(&["v1"]),
                ..Snapshot::default()
            }
            .with_timestamp(100),
        );

        let store = MemoryStore::new();
        let local = Snapshot {
            workers: records(&["w-local"]),
            ..Snapshot::default()
        }
        .with_timestamp(150);
        let snapshots = SnapshotStore::new(store.clone());
        snapshots.save(&local).await.unwrap();
        snapshots.save_scope(Some(&scope("alpha"))).await.unwrap();
        snapshots.save_baseline(SyncBaseline::new(150)).await.unwrap();

        let handle = start_with(
            &remote,
            store,
            Session::new(Role::Worker, "late"),
            WritePolicy::AdminOnly,
            at_100,
        )
        .await;

        let report = handle.pull_now().await.unwrap();
        assert!(matches!(
            report,
            SyncReport::Pulled {
                outcome: PullOutcome::Ignored { .. }
            }
        ));
        assert_eq!(handle.snapshot().await.unwrap(), local);
        assert_eq!(handle.state().await.unwrap().baseline, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_push_recovers_on_next_mutation() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;
        remote.fail_next_push(RemoteError::Network("offline".to_string()));

        handle
            .set_collection(Collection::Logs, records(&["l1"]))
            .await
            .unwrap();
        sleep(DEBOUNCE + Duration::from_millis(100)).await;

        let state = handle.state().await.unwrap();
        assert_eq!(state.status, SyncStatus::Error);
        assert!(state.last_error.unwrap().contains("offline"));
        assert_eq!(remote.push_count(), 0);

        handle
            .set_collection(Collection::Logs, records(&["l1", "l2"]))
            .await
            .unwrap();
        sleep(DEBOUNCE + Duration::from_millis(100)).await;

        assert_eq!(remote.push_count(), 1);
        assert_eq!(handle.current_status(), SyncStatus::Synced);
        assert_eq!(
            remote.document(&scope("alpha")).unwrap().logs,
            records(&["l1", "l2"])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn changing_scope_resets_baseline_and_pulls_immediately() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;
        handle
            .set_collection(Collection::Vehicles, records(&["v1"]))
            .await
            .unwrap();
        handle.flush().await.unwrap();
        assert_eq!(handle.state().await.unwrap().baseline, 100);

        let outcome = handle.set_scope(scope("beta")).await.unwrap();

        assert_eq!(outcome, Some(PullOutcome::Empty));
        assert_eq!(remote.pull_count(&scope("beta")), 1);
        let state = handle.state().await.unwrap();
        assert_eq!(state.baseline, 0);
        assert_eq!(state.scope, Some(scope("beta")));
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_scope_cancels_both_timers() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;
        handle
            .set_collection(Collection::Vehicles, records(&["v1"]))
            .await
            .unwrap();

        handle.clear_scope().await.unwrap();
        let pulls = remote.pull_count(&scope("alpha"));
        sleep(POLL * 3).await;

        assert_eq!(remote.push_count(), 0);
        assert_eq!(remote.pull_count(&scope("alpha")), pulls);
        assert_eq!(handle.current_status(), SyncStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn ending_session_stops_polling() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;
        sleep(POLL + Duration::from_millis(1)).await;
        let pulls = remote.pull_count(&scope("alpha"));
        assert!(pulls >= 1);

        handle.set_session(Session::anonymous()).await.unwrap();
        sleep(POLL * 3).await;

        assert_eq!(remote.pull_count(&scope("alpha")), pulls);
        assert_eq!(handle.pull_now().await.unwrap(), SyncReport::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn import_seed_never_arms_a_push() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;

        let imported = Snapshot {
            works: records(&["o1"]),
            ..Snapshot::default()
        }
        .with_timestamp(9_999);
        handle.seed(imported).await.unwrap();
        sleep(DEBOUNCE * 2).await;

        assert_eq!(remote.push_count(), 0);
        let state = handle.state().await.unwrap();
        assert_eq!(state.baseline, 0);
        assert_eq!(state.scope, Some(scope("alpha")));
        assert_eq!(handle.snapshot().await.unwrap().works, records(&["o1"]));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_engine() {
        let remote = MemoryRemote::new();
        let handle = start(&remote, admin("alpha"), WritePolicy::AnyAuthenticated).await;
        handle
            .set_collection(Collection::Vehicles, records(&["v1"]))
            .await
            .unwrap();

        handle.shutdown().await.unwrap();
        sleep(DEBOUNCE * 2).await;

        assert_eq!(remote.push_count(), 0);
        assert!(matches!(
            handle.snapshot().await,
            Err(Error::EngineStopped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_persist_locally_before_sync() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        let handle = start_with(
            &remote,
            store.clone(),
            Session::anonymous(),
            WritePolicy::AnyAuthenticated,
            at_100,
        )
        .await;

        handle
            .set_collection(Collection::Tariffs, records(&["p2"]))
            .await
            .unwrap();

        let reloaded = SnapshotStore::new(store).load_snapshot().await;
        assert_eq!(reloaded.tariffs, records(&["p2"]));
        assert_eq!(remote.push_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scope_change_keeps_polling_when_local_write_fails() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        let handle = start_with(
            &remote,
            store.clone(),
            admin("alpha"),
            WritePolicy::AnyAuthenticated,
            at_100,
        )
        .await;

        store.fail_next_write("fleet_sync_scope");
        let outcome = handle.set_scope(scope("beta")).await.unwrap();
        assert_eq!(outcome, Some(PullOutcome::Empty));

        remote.insert(
            &scope("beta"),
            Snapshot {
                workers: records(&["w9"]),
                ..Snapshot::default()
            }
            .with_timestamp(500),
        );
        sleep(POLL + Duration::from_millis(1)).await;

        assert_eq!(remote.pull_count(&scope("beta")), 2);
        let state = handle.state().await.unwrap();
        assert_eq!(state.scope, Some(scope("beta")));
        assert_eq!(state.baseline, 500);
        assert_eq!(handle.snapshot().await.unwrap().workers, records(&["w9"]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_local_write_discards_edit_and_push() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        let handle = start_with(
            &remote,
            store.clone(),
            admin("alpha"),
            WritePolicy::AnyAuthenticated,
            at_100,
        )
        .await;
        let before = handle.snapshot().await.unwrap();

        store.fail_next_write("fleet_vehicles");
        let result = handle
            .set_collection(Collection::Vehicles, records(&["v1"]))
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
        sleep(DEBOUNCE * 2).await;

        assert_eq!(remote.push_count(), 0);
        assert_eq!(handle.snapshot().await.unwrap(), before);
        assert!(!handle.state().await.unwrap().pending_push);

        handle
            .set_collection(Collection::Vehicles, records(&["v2"]))
            .await
            .unwrap();
        sleep(DEBOUNCE + Duration::from_millis(1)).await;

        let pushes = remote.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].1.vehicles, records(&["v2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_replace_restores_previous_snapshot() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        let handle = start_with(
            &remote,
            store.clone(),
            admin("alpha"),
            WritePolicy::AnyAuthenticated,
            at_100,
        )
        .await;
        handle
            .set_collection(Collection::Logs, records(&["l1"]))
            .await
            .unwrap();
        handle.flush().await.unwrap();

        store.fail_next_write("fleet_works");
        let restored = Snapshot {
            vehicles: records(&["v7"]),
            logs: records(&["l7"]),
            ..Snapshot::default()
        };
        assert!(handle.replace(restored).await.is_err());
        sleep(DEBOUNCE * 2).await;

        assert_eq!(remote.push_count(), 1);
        assert_eq!(handle.snapshot().await.unwrap().logs, records(&["l1"]));
        let reloaded = SnapshotStore::new(store).load_snapshot().await;
        assert_eq!(reloaded.logs, records(&["l1"]));
        assert!(reloaded.vehicles.is_empty());
    }
}
