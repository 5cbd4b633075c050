//! Fleet CLI - keep fleet records in sync across devices from the terminal.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::Parser;

use crate::cli::{BackupCommands, Cli, Commands, RecordCommands, ScopeCommands};
use crate::commands::auth_cmd::{run_login, run_logout};
use crate::commands::backup::{run_backup_export, run_backup_restore};
use crate::commands::common::Workspace;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::records::{
    run_records_add, run_records_list, run_records_remove, run_records_set, run_records_summary,
};
use crate::commands::scope::{run_scope_create, run_scope_join, run_scope_leave, run_scope_show};
use crate::commands::share::{run_import, run_share};
use crate::commands::sync::{run_pull, run_push, run_status, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleet=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Config { command } => run_config(command, profile, cli.db_path)?,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref())?,
        command => {
            let workspace = Workspace::load(profile, cli.db_path)?;
            run_workspace_command(command, &workspace).await?;
        }
    }

    Ok(())
}

async fn run_workspace_command(command: Commands, workspace: &Workspace) -> Result<(), CliError> {
    match command {
        Commands::Login {
            role,
            identity,
            token,
        } => run_login(workspace, role, &identity, token),
        Commands::Logout => run_logout(workspace),
        Commands::Status { json } => run_status(workspace, json).await,
        Commands::Scope { command } => match command {
            ScopeCommands::Create => run_scope_create(workspace).await,
            ScopeCommands::Join { scope } => run_scope_join(workspace, &scope).await,
            ScopeCommands::Leave => run_scope_leave(workspace).await,
            ScopeCommands::Show => run_scope_show(workspace).await,
        },
        Commands::Push => run_push(workspace).await,
        Commands::Pull => run_pull(workspace).await,
        Commands::Watch => run_watch(workspace).await,
        Commands::Records { command } => match command {
            RecordCommands::List { collection, json } => {
                run_records_list(workspace, &collection, json).await
            }
            RecordCommands::Add { collection, record } => {
                run_records_add(workspace, &collection, &record).await
            }
            RecordCommands::Remove { collection, id } => {
                run_records_remove(workspace, &collection, &id).await
            }
            RecordCommands::Set { collection, input } => {
                run_records_set(workspace, &collection, input.as_deref()).await
            }
            RecordCommands::Summary => run_records_summary(workspace).await,
        },
        Commands::Backup { command } => match command {
            BackupCommands::Export { output } => {
                run_backup_export(workspace, output.as_deref()).await
            }
            BackupCommands::Restore { path } => run_backup_restore(workspace, &path).await,
        },
        Commands::Share { base_url } => run_share(workspace, base_url).await,
        Commands::Import { locator, yes } => run_import(workspace, &locator, yes).await,
        Commands::Config { .. } | Commands::Completions { .. } => Ok(()),
    }
}
