use std::env;

use fleet_core::config::BackendKind;
use fleet_core::{Role, Session};

use crate::cli::RoleArg;
use crate::commands::common::Workspace;
use crate::config_profiles::normalize_text_option;
use crate::error::CliError;

pub fn run_login(
    workspace: &Workspace,
    role: RoleArg,
    identity: &str,
    token: Option<String>,
) -> Result<(), CliError> {
    let token = normalize_text_option(token)
        .or_else(|| normalize_text_option(env::var("FLEET_TOKEN").ok()));
    if workspace.config.backend == BackendKind::Tenant && token.is_none() {
        return Err(CliError::Session(
            "the tenant backend requires a bearer token (--token or FLEET_TOKEN)".to_string(),
        ));
    }

    let session = build_session(role, identity, token)?;
    workspace.sessions().save(&session)?;
    println!(
        "Signed in profile '{}' as {} ({})",
        workspace.profile_name,
        identity.trim(),
        session.role
    );
    Ok(())
}

pub fn run_logout(workspace: &Workspace) -> Result<(), CliError> {
    workspace.sessions().clear()?;
    println!("Signed out profile '{}'", workspace.profile_name);
    Ok(())
}

pub fn build_session(
    role: RoleArg,
    identity: &str,
    token: Option<String>,
) -> Result<Session, CliError> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(CliError::Session("identity must not be empty".to_string()));
    }

    let role = match role {
        RoleArg::Worker => Role::Worker,
        RoleArg::Admin => Role::Admin,
    };
    let session = Session::new(role, identity);
    Ok(match normalize_text_option(token) {
        Some(token) => session.with_credential(token),
        None => session,
    })
}
