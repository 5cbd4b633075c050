use std::collections::BTreeMap;

use fleet_core::sync::SyncEvent;
use fleet_core::{AccessGate, SyncHandle};
use serde::Serialize;

use crate::commands::common::{describe_pull, describe_report, format_sync_timestamp, Workspace};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub profile: String,
    pub backend: String,
    pub base_url: Option<String>,
    pub role: String,
    pub identity: Option<String>,
    pub scope: Option<String>,
    pub can_read: bool,
    pub can_write: bool,
    pub baseline: i64,
    pub write_timestamp: i64,
    pub records: BTreeMap<String, usize>,
}

pub async fn run_status(workspace: &Workspace, as_json: bool) -> Result<(), CliError> {
    let report = status_report(workspace).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Profile:   {}", report.profile);
    match report.base_url.as_deref() {
        Some(url) => println!("Remote:    {} ({})", url, report.backend),
        None => println!("Remote:    not configured"),
    }
    match report.identity.as_deref() {
        Some(identity) => println!("Session:   {} ({})", identity, report.role),
        None => println!("Session:   signed out"),
    }
    println!(
        "Scope:     {}",
        report.scope.as_deref().unwrap_or("none")
    );
    println!(
        "Access:    read={} write={}",
        report.can_read, report.can_write
    );
    println!("Baseline:  {}", format_sync_timestamp(report.baseline));
    println!("Written:   {}", format_sync_timestamp(report.write_timestamp));
    for (collection, count) in &report.records {
        println!("  {collection:<10} {count}");
    }
    Ok(())
}

/// Assemble status from local state only; no remote call is made.
pub async fn status_report(workspace: &Workspace) -> Result<StatusReport, CliError> {
    let store = workspace.open_store().await?;
    let session = workspace.sessions().load_or_anonymous()?;
    let snapshot = store.load_snapshot().await;
    let stored_scope = store.load_scope().await;
    let access = AccessGate::new(workspace.config.write_policy).evaluate(&session, stored_scope.as_ref());

    Ok(StatusReport {
        profile: workspace.profile_name.clone(),
        backend: workspace.config.backend.to_string(),
        base_url: workspace.config.base_url.clone(),
        role: session.role.to_string(),
        identity: session.identity.clone(),
        scope: access.scope.as_ref().map(ToString::to_string),
        can_read: access.authorization.can_read,
        can_write: access.authorization.can_write,
        baseline: store.load_baseline().await.timestamp(),
        write_timestamp: snapshot.write_timestamp,
        records: snapshot
            .record_counts()
            .into_iter()
            .map(|(collection, count)| (collection.to_string(), count))
            .collect(),
    })
}

pub async fn run_push(workspace: &Workspace) -> Result<(), CliError> {
    workspace.require_remote()?;
    let handle = workspace.start_engine().await?;
    let result = handle.flush().await;
    let state = handle.state().await;
    handle.shutdown().await?;

    let report = result?;
    if matches!(report, fleet_core::sync::SyncReport::Skipped) {
        return Err(explain_skip(&state?));
    }
    println!("{}", describe_report(&report));
    Ok(())
}

pub async fn run_pull(workspace: &Workspace) -> Result<(), CliError> {
    workspace.require_remote()?;
    let handle = workspace.start_engine().await?;
    let result = handle.pull_now().await;
    let state = handle.state().await;
    handle.shutdown().await?;

    let report = result?;
    if matches!(report, fleet_core::sync::SyncReport::Skipped) {
        return Err(explain_skip(&state?));
    }
    println!("{}", describe_report(&report));
    Ok(())
}

fn explain_skip(state: &fleet_core::sync::SyncState) -> CliError {
    if state.scope.is_none() {
        CliError::NoScope
    } else if !state.authorization.can_read {
        CliError::NotSignedIn
    } else {
        CliError::Session("this session is read-only under the current write policy".to_string())
    }
}

/// Run the engine in the foreground, printing events until Ctrl-C.
pub async fn run_watch(workspace: &Workspace) -> Result<(), CliError> {
    workspace.require_remote()?;
    let handle = workspace.start_engine().await?;
    let state = handle.state().await?;
    if state.scope.is_none() {
        handle.shutdown().await?;
        return Err(CliError::NoScope);
    }

    println!(
        "Watching scope {} (Ctrl-C to stop)",
        state.scope.as_ref().map_or("-", |scope| scope.as_str())
    );
    watch_until_interrupted(&handle).await?;
    handle.shutdown().await?;
    Ok(())
}

async fn watch_until_interrupted(handle: &SyncHandle) -> Result<(), CliError> {
    let mut events = handle.subscribe();
    let mut status = handle.status();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                println!("Stopping");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", describe_event(&event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} sync events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            },
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                tracing::debug!("Sync status: {}", *status.borrow_and_update());
            }
        }
    }
}

pub fn describe_event(event: &SyncEvent) -> String {
    let now = chrono::Local::now().format("%H:%M:%S");
    let message = match event {
        SyncEvent::Pushed {
            scope,
            write_timestamp,
        } => format!("pushed to {scope} ({})", format_sync_timestamp(*write_timestamp)),
        SyncEvent::PushFailed { scope, error } => format!("push to {scope} failed: {error}"),
        SyncEvent::Pulled { scope, outcome } => {
            format!("{scope}: {}", describe_pull(outcome))
        }
        SyncEvent::PullFailed { scope, error } => format!("pull from {scope} failed: {error}"),
        SyncEvent::ScopeChanged { scope: Some(scope) } => format!("scope set to {scope}"),
        SyncEvent::ScopeChanged { scope: None } => "scope cleared".to_string(),
        SyncEvent::Seeded => "local data replaced by import".to_string(),
    };
    format!("[{now}] {message}")
}
