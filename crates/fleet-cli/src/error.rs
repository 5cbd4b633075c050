use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fleet_core::Error),
    #[error(transparent)]
    Remote(#[from] fleet_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Session error: {0}")]
    Session(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("No record with id '{id}' in {collection}")]
    RecordNotFound { collection: String, id: String },
    #[error("Locator does not contain an import payload")]
    NoImportPayload,
    #[error("Import cancelled")]
    ImportDeclined,
    #[error("Not signed in. Run `fleet login --role <worker|admin> --identity <name>` first.")]
    NotSignedIn,
    #[error("No sync scope set. Run `fleet scope create` or `fleet scope join <id>`.")]
    NoScope,
    #[error(
        "Sync is not configured. Run `fleet config init --base-url <url>` or set FLEET_SYNC_BASE_URL."
    )]
    SyncNotConfigured,
}

impl From<fleet_core::config::ConfigError> for CliError {
    fn from(error: fleet_core::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
