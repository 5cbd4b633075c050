use std::io::{self, Read};
use std::path::Path;

use fleet_core::backup::render_summary;
use fleet_core::models::{Collection, Record};
use fleet_core::sync::SyncReport;
use fleet_core::SyncHandle;

use crate::commands::common::{
    describe_report, parse_collection, push_after_edit, record_line, refresh_before_edit,
    Workspace,
};
use crate::error::CliError;

pub async fn run_records_list(
    workspace: &Workspace,
    collection: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let snapshot = workspace.open_store().await?.load_snapshot().await;
    let records = snapshot.collection(collection);

    if as_json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No {collection} yet.");
        return Ok(());
    }
    for record in records {
        println!("{}", record_line(record));
    }
    Ok(())
}

pub async fn run_records_summary(workspace: &Workspace) -> Result<(), CliError> {
    let snapshot = workspace.open_store().await?.load_snapshot().await;
    print!("{}", render_summary(&snapshot));
    Ok(())
}

pub async fn run_records_add(
    workspace: &Workspace,
    collection: &str,
    raw_record: &str,
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let record = parse_record(raw_record)?;

    let handle = open_for_edit(workspace).await?;
    let result = add_record(&handle, collection, record).await;
    finish_edit(workspace, &handle, result).await
}

pub async fn run_records_remove(
    workspace: &Workspace,
    collection: &str,
    id: &str,
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;

    let handle = open_for_edit(workspace).await?;
    let result = remove_record(&handle, collection, id).await;
    finish_edit(workspace, &handle, result).await
}

pub async fn run_records_set(
    workspace: &Workspace,
    collection: &str,
    input: Option<&Path>,
) -> Result<(), CliError> {
    let collection = parse_collection(collection)?;
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut raw = String::new();
            io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };
    let records = parse_records(&raw)?;
    let count = records.len();

    let handle = open_for_edit(workspace).await?;
    let result = handle
        .set_collection(collection, records)
        .await
        .map_err(CliError::from);
    finish_edit(workspace, &handle, result).await?;
    println!("Replaced {collection} with {count} records");
    Ok(())
}

/// Start the engine and pull, so edits apply to current data.
pub async fn open_for_edit(workspace: &Workspace) -> Result<SyncHandle, CliError> {
    let handle = workspace.start_engine().await?;
    refresh_before_edit(&handle).await?;
    Ok(handle)
}

/// Push a successful edit right away, then stop the engine.
pub async fn finish_edit(
    workspace: &Workspace,
    handle: &SyncHandle,
    result: Result<(), CliError>,
) -> Result<(), CliError> {
    if let Err(error) = result {
        handle.shutdown().await?;
        return Err(error);
    }

    let report = if workspace.config.is_remote_configured() {
        push_after_edit(handle).await?
    } else {
        SyncReport::Skipped
    };
    handle.shutdown().await?;
    println!("{}", describe_report(&report));
    Ok(())
}

pub async fn add_record(
    handle: &SyncHandle,
    collection: Collection,
    record: Record,
) -> Result<(), CliError> {
    handle
        .mutate(collection, move |records| records.push(record))
        .await?;
    Ok(())
}

pub async fn remove_record(
    handle: &SyncHandle,
    collection: Collection,
    id: &str,
) -> Result<(), CliError> {
    let snapshot = handle.snapshot().await?;
    if !snapshot
        .collection(collection)
        .iter()
        .any(|record| record_has_id(record, id))
    {
        return Err(CliError::RecordNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    let id = id.to_string();
    handle
        .mutate(collection, move |records| {
            records.retain(|record| !record_has_id(record, &id));
        })
        .await?;
    Ok(())
}

fn record_has_id(record: &Record, id: &str) -> bool {
    record.get("id").is_some_and(|value| match value.as_str() {
        Some(value) => value == id,
        None => value.to_string() == id,
    })
}

pub fn parse_record(raw: &str) -> Result<Record, CliError> {
    let record: Record = serde_json::from_str(raw.trim())
        .map_err(|error| CliError::InvalidRecord(error.to_string()))?;
    if !record.is_object() {
        return Err(CliError::InvalidRecord(
            "record must be a JSON object".to_string(),
        ));
    }
    Ok(record)
}

pub fn parse_records(raw: &str) -> Result<Vec<Record>, CliError> {
    let records: Vec<Record> = serde_json::from_str(raw.trim())
        .map_err(|error| CliError::InvalidRecord(format!("expected a JSON array: {error}")))?;
    if let Some(index) = records.iter().position(|record| !record.is_object()) {
        return Err(CliError::InvalidRecord(format!(
            "element {index} is not a JSON object"
        )));
    }
    Ok(records)
}
