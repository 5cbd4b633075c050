use std::env;
use std::path::PathBuf;

use fleet_core::config::normalize_base_url;
use serde::Serialize;

use crate::cli::ConfigCommands;
use crate::commands::common::Workspace;
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            backend,
            base_url,
            debounce_ms,
            poll_ms,
            timeout_secs,
            write_policy,
            share_base_url,
            no_activate,
        } => run_config_init(
            global_profile,
            CliProfile {
                backend,
                sync_base_url: base_url,
                debounce_ms,
                poll_ms,
                timeout_secs,
                write_policy,
                share_base_url,
            },
            no_activate,
        ),
        ConfigCommands::Show { json } => {
            run_config_show(&Workspace::load(global_profile, db_path)?, json)
        }
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    explicit: CliProfile,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();

    let merged = merge_profile(&existing, explicit, |name| env::var(name).ok())?;
    merged.sync_config_with(|_| None)?;
    *config.profile_mut_or_default(&profile_name) = merged;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let configured = config
        .profile(&profile_name)
        .is_some_and(|profile| profile.sync_base_url.is_some());
    if configured {
        println!(
            "Run `fleet login --role <worker|admin> --identity <name>` and then `fleet scope create` or `fleet scope join <id>`."
        );
    } else {
        println!("Profile '{profile_name}' has no sync base URL; records stay on this device.");
    }
    Ok(())
}

/// Combine explicit flags, `FLEET_*` variables and the existing profile, in
/// that order of precedence.
pub fn merge_profile(
    existing: &CliProfile,
    explicit: CliProfile,
    env: impl Fn(&str) -> Option<String>,
) -> Result<CliProfile, CliError> {
    let text = |explicit: Option<String>, name: &str, current: &Option<String>| {
        normalize_text_option(explicit)
            .or_else(|| normalize_text_option(env(name)))
            .or_else(|| normalize_text_option(current.clone()))
    };
    let number = |explicit: Option<u64>, name: &str, current: Option<u64>| {
        match explicit {
            Some(value) => Ok(Some(value)),
            None => match normalize_text_option(env(name)) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| CliError::Config(format!("{name} must be a whole number"))),
                None => Ok(current),
            },
        }
    };

    let sync_base_url = text(
        explicit.sync_base_url,
        "FLEET_SYNC_BASE_URL",
        &existing.sync_base_url,
    )
    .map(|url| normalize_base_url(&url))
    .transpose()?;

    Ok(CliProfile {
        backend: text(explicit.backend, "FLEET_SYNC_BACKEND", &existing.backend),
        sync_base_url,
        debounce_ms: number(
            explicit.debounce_ms,
            "FLEET_SYNC_DEBOUNCE_MS",
            existing.debounce_ms,
        )?,
        poll_ms: number(explicit.poll_ms, "FLEET_SYNC_POLL_MS", existing.poll_ms)?,
        timeout_secs: number(
            explicit.timeout_secs,
            "FLEET_SYNC_TIMEOUT_SECS",
            existing.timeout_secs,
        )?,
        write_policy: text(
            explicit.write_policy,
            "FLEET_WRITE_POLICY",
            &existing.write_policy,
        ),
        share_base_url: text(
            explicit.share_base_url,
            "FLEET_SHARE_BASE_URL",
            &existing.share_base_url,
        ),
    })
}

#[derive(Debug, Serialize)]
struct ConfigView<'a> {
    profile: &'a str,
    backend: String,
    base_url: Option<&'a str>,
    debounce_ms: u128,
    poll_ms: u128,
    timeout_secs: u64,
    write_policy: &'static str,
    share_base_url: String,
    db_path: String,
}

pub fn run_config_show(workspace: &Workspace, as_json: bool) -> Result<(), CliError> {
    let config = &workspace.config;
    let view = ConfigView {
        profile: &workspace.profile_name,
        backend: config.backend.to_string(),
        base_url: config.base_url.as_deref(),
        debounce_ms: config.debounce.as_millis(),
        poll_ms: config.poll_interval.as_millis(),
        timeout_secs: config.request_timeout.as_secs(),
        write_policy: config.write_policy.as_str(),
        share_base_url: workspace.profile.share_base_url(),
        db_path: workspace.db_path.display().to_string(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("profile        {}", view.profile);
    println!("backend        {}", view.backend);
    println!("base_url       {}", view.base_url.unwrap_or("(local only)"));
    println!("debounce_ms    {}", view.debounce_ms);
    println!("poll_ms        {}", view.poll_ms);
    println!("timeout_secs   {}", view.timeout_secs);
    println!("write_policy   {}", view.write_policy);
    println!("share_base_url {}", view.share_base_url);
    println!("db_path        {}", view.db_path);
    Ok(())
}
