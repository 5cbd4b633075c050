use fleet_core::models::SyncScope;
use fleet_core::remote::RemoteStore;
use fleet_core::SyncHandle;

use crate::commands::common::{describe_pull, describe_report, push_after_edit, Workspace};
use crate::error::CliError;

pub async fn run_scope_create(workspace: &Workspace) -> Result<(), CliError> {
    let remote = workspace.require_remote()?;
    let session = workspace.sessions().load()?.ok_or(CliError::NotSignedIn)?;
    remote.set_credential(session.credential.as_deref());

    let handle = workspace.start_engine().await?;
    let result = create_scope(&handle, &remote).await;
    handle.shutdown().await?;

    let scope = result?;
    println!("Created scope {scope}");
    println!("Join from another device with: fleet scope join {scope}");
    Ok(())
}

/// Allocate a remote scope seeded with local data, switch to it and push.
pub async fn create_scope<R: RemoteStore>(
    handle: &SyncHandle,
    remote: &R,
) -> Result<SyncScope, CliError> {
    let state = handle.state().await?;
    if !state.authorization.can_write {
        return Err(CliError::Session(
            "creating a scope requires write access".to_string(),
        ));
    }

    let snapshot = handle.snapshot().await?;
    let scope = remote.create_scope(&snapshot).await?;
    handle.set_scope(scope.clone()).await?;
    let report = push_after_edit(handle).await?;
    println!("{}", describe_report(&report));
    Ok(scope)
}

pub async fn run_scope_join(workspace: &Workspace, raw_scope: &str) -> Result<(), CliError> {
    workspace.require_remote()?;
    let scope = SyncScope::parse(raw_scope)?;

    let handle = workspace.start_engine().await?;
    let result = handle.set_scope(scope.clone()).await;
    handle.shutdown().await?;

    match result? {
        Some(outcome) => println!("Joined scope {scope}. {}", describe_pull(&outcome)),
        None => println!("Scope set to {scope}. Sign in to start syncing."),
    }
    Ok(())
}

pub async fn run_scope_leave(workspace: &Workspace) -> Result<(), CliError> {
    let handle = workspace.start_engine().await?;
    let result = handle.clear_scope().await;
    handle.shutdown().await?;
    result?;

    println!("Left sync scope. Local data is kept.");
    Ok(())
}

pub async fn run_scope_show(workspace: &Workspace) -> Result<(), CliError> {
    let store = workspace.open_store().await?;
    match store.load_scope().await {
        Some(scope) => println!("{scope}"),
        None => println!("No sync scope set."),
    }
    Ok(())
}
