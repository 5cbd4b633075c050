use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use fleet_core::config::SyncConfig;
use fleet_core::models::{Collection, Record, Snapshot, SyncScope};
use fleet_core::remote::{RemoteBackend, RemoteError, RemoteResult, RemoteStore};
use fleet_core::store::{LibSqlStore, SnapshotStore};
use fleet_core::sync::{EngineOptions, PullOutcome, SyncEngine, SyncReport};
use fleet_core::{AccessGate, Session, SyncHandle};

use crate::auth::SessionStore;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Everything a command needs to know about the selected profile.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub profile_name: String,
    pub profile: CliProfile,
    pub config: SyncConfig,
    pub db_path: PathBuf,
}

impl Workspace {
    pub fn load(
        profile_name: Option<&str>,
        db_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = profiles.resolve_profile_name(profile_name);
        let profile = profiles.profile(&profile_name).cloned().unwrap_or_default();
        let config = profile.sync_config()?;

        Ok(Self {
            profile_name,
            profile,
            config,
            db_path: resolve_db_path(db_path),
        })
    }

    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(&self.profile_name)
    }

    pub async fn open_store(&self) -> Result<SnapshotStore<LibSqlStore>, CliError> {
        Ok(SnapshotStore::new(LibSqlStore::open(&self.db_path).await?))
    }

    /// HTTP backend for this profile, or `None` when sync is not configured.
    pub fn remote(&self) -> Result<Option<RemoteBackend>, CliError> {
        if !self.config.is_remote_configured() {
            return Ok(None);
        }
        Ok(Some(RemoteBackend::from_config(&self.config)?))
    }

    pub fn require_remote(&self) -> Result<RemoteBackend, CliError> {
        self.remote()?.ok_or(CliError::SyncNotConfigured)
    }

    /// Start the sync engine for this profile.
    ///
    /// Without a configured remote the engine runs with a signed-out session,
    /// so edits are persisted locally and nothing is sent anywhere.
    pub async fn start_engine(&self) -> Result<SyncHandle, CliError> {
        let store = self.open_store().await?;
        let remote = self.remote()?;
        let session = if remote.is_some() {
            self.sessions().load_or_anonymous()?
        } else {
            Session::anonymous()
        };
        let remote = remote.map_or(CliRemote::Offline, CliRemote::Online);

        Ok(SyncEngine::start(
            EngineOptions::from_config(&self.config),
            AccessGate::new(self.config.write_policy),
            session,
            remote,
            store,
        )
        .await)
    }
}

/// Remote used by CLI engines.
#[derive(Debug, Clone)]
pub enum CliRemote {
    Online(RemoteBackend),
    Offline,
}

fn offline_error() -> RemoteError {
    RemoteError::InvalidConfiguration("sync base URL is not configured".to_string())
}

impl RemoteStore for CliRemote {
    async fn pull(&self, scope: &SyncScope) -> RemoteResult<Option<Snapshot>> {
        match self {
            Self::Online(remote) => remote.pull(scope).await,
            Self::Offline => Err(offline_error()),
        }
    }

    async fn push(&self, scope: &SyncScope, snapshot: &Snapshot) -> RemoteResult<()> {
        match self {
            Self::Online(remote) => remote.push(scope, snapshot).await,
            Self::Offline => Err(offline_error()),
        }
    }

    async fn create_scope(&self, initial: &Snapshot) -> RemoteResult<SyncScope> {
        match self {
            Self::Online(remote) => remote.create_scope(initial).await,
            Self::Offline => Err(offline_error()),
        }
    }

    fn set_credential(&self, credential: Option<&str>) {
        if let Self::Online(remote) = self {
            remote.set_credential(credential);
        }
    }
}

/// Bring local data up to date before editing it.
///
/// A failed pull is reported and the edit proceeds on local data.
pub async fn refresh_before_edit(handle: &SyncHandle) -> Result<(), CliError> {
    match handle.pull_now().await {
        Ok(_) => Ok(()),
        Err(fleet_core::Error::Remote(error)) => {
            eprintln!("Warning: could not refresh from remote: {error}");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

/// Push an edit right away instead of waiting for the debounce.
///
/// Returns the report so callers can print it; remote failures leave the edit
/// saved locally and pending.
pub async fn push_after_edit(handle: &SyncHandle) -> Result<SyncReport, CliError> {
    match handle.flush().await {
        Ok(report) => Ok(report),
        Err(fleet_core::Error::Remote(error)) => {
            eprintln!("Warning: saved locally but push failed: {error}");
            Ok(SyncReport::Skipped)
        }
        Err(error) => Err(error.into()),
    }
}

pub fn describe_report(report: &SyncReport) -> String {
    match report {
        SyncReport::Pushed { write_timestamp } => {
            format!("Pushed snapshot ({})", format_sync_timestamp(*write_timestamp))
        }
        SyncReport::Pulled { outcome } => describe_pull(outcome),
        SyncReport::Skipped => "Saved locally (not synced)".to_string(),
    }
}

pub fn describe_pull(outcome: &PullOutcome) -> String {
    match outcome {
        PullOutcome::Empty => "Remote scope is empty".to_string(),
        PullOutcome::Applied { write_timestamp } => format!(
            "Pulled remote snapshot ({})",
            format_sync_timestamp(*write_timestamp)
        ),
        PullOutcome::Ignored {
            remote_timestamp,
            baseline,
        } => format!("Already up to date (remote {remote_timestamp}, baseline {baseline})"),
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    if timestamp_ms <= 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn parse_collection(raw: &str) -> Result<Collection, CliError> {
    Ok(raw.parse::<Collection>()?)
}

/// Short single-line rendering of a record for list output.
pub fn record_line(record: &Record) -> String {
    let id = record
        .get("id")
        .map(|id| id.as_str().map_or_else(|| id.to_string(), ToString::to_string))
        .unwrap_or_else(|| "-".to_string());
    let fields = record.as_object().map_or_else(
        || record.to_string(),
        |object| {
            object
                .iter()
                .filter(|(key, _)| key.as_str() != "id")
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(" ")
        },
    );
    format!("{id:<12} {fields}")
}

pub fn confirm(prompt: &str) -> Result<bool, CliError> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FLEET_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleet")
        .join("fleet.db")
}
