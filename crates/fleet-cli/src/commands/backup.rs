use std::io::{self, Write};
use std::path::Path;

use fleet_core::backup::{parse_backup, render_backup, render_summary};
use fleet_core::util::unix_millis_now;

use crate::commands::common::Workspace;
use crate::commands::records::{finish_edit, open_for_edit};
use crate::error::CliError;

pub async fn run_backup_export(
    workspace: &Workspace,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    let snapshot = workspace.open_store().await?.load_snapshot().await;
    let rendered = render_backup(&snapshot, unix_millis_now())?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("Backup written to {}", path.display());
    } else {
        io::stdout().write_all(rendered.as_bytes())?;
        io::stdout().write_all(b"\n")?;
    }
    Ok(())
}

pub async fn run_backup_restore(workspace: &Workspace, path: &Path) -> Result<(), CliError> {
    let raw = std::fs::read_to_string(path)?;
    let snapshot = parse_backup(&raw)?;
    print!("{}", render_summary(&snapshot));

    let handle = open_for_edit(workspace).await?;
    let result = handle.replace(snapshot).await.map_err(CliError::from);
    finish_edit(workspace, &handle, result).await?;
    println!("Restored backup from {}", path.display());
    Ok(())
}
