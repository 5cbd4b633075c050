use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Keep fleet records in sync across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for sync configuration and session
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure CLI sync profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sign in with a role for this profile
    Login {
        /// Session role
        #[arg(long, value_enum)]
        role: RoleArg,
        /// Display name or user id
        #[arg(long)]
        identity: String,
        /// Bearer token for the authenticated backend (or FLEET_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Sign out of this profile
    Logout,
    /// Show sync status for this profile
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create, join or leave a sync scope
    Scope {
        #[command(subcommand)]
        command: ScopeCommands,
    },
    /// Push the local snapshot now
    Push,
    /// Pull the remote snapshot now
    Pull,
    /// Keep syncing in the foreground until interrupted
    Watch,
    /// Inspect or edit local records
    Records {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Export or restore a backup file
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Print a share link carrying the local snapshot
    Share {
        /// Base URL for the link (defaults to the profile's share URL)
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,
    },
    /// Replace local data with a snapshot from a share link
    Import {
        /// Share link or `#import=...` fragment
        locator: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RoleArg {
    Worker,
    Admin,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update a profile
    Init {
        /// Remote backend: blob or tenant
        #[arg(long)]
        backend: Option<String>,
        /// Remote base URL
        #[arg(long)]
        base_url: Option<String>,
        /// Quiet period before a push, in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,
        /// Poll interval, in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,
        /// HTTP request timeout, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Who may push: admin-only or any-authenticated
        #[arg(long)]
        write_policy: Option<String>,
        /// Base URL for share links
        #[arg(long)]
        share_base_url: Option<String>,
        /// Do not set this profile as active
        #[arg(long)]
        no_activate: bool,
    },
    /// Show the effective configuration of a profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ScopeCommands {
    /// Create a new remote scope seeded with local data and switch to it
    Create,
    /// Switch to an existing scope and pull it
    Join {
        /// Scope identifier shared by another device
        scope: String,
    },
    /// Stop syncing
    Leave,
    /// Print the current scope
    Show,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// List records in a collection
    List {
        /// vehicles, workers, works, logs or tariffs
        collection: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Append a record given as a JSON object
    Add {
        collection: String,
        /// Record JSON, e.g. '{"id":"v1","plate":"1234-ABC"}'
        record: String,
    },
    /// Remove the record with the given id
    Remove { collection: String, id: String },
    /// Replace a whole collection with a JSON array read from a file or stdin
    Set {
        collection: String,
        /// JSON file (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
    /// Show record counts per collection
    Summary,
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Write the local snapshot to a backup file
    Export {
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Replace local data with a backup file and push it
    Restore {
        /// Backup file
        path: PathBuf,
    },
}
