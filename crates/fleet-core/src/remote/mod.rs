//! Remote store adapters.
//!
//! The sync engine is written once against [`RemoteStore`]; each backend is a
//! separate implementation selected by configuration through
//! [`RemoteBackend`].

mod blob;
mod http;
mod memory;
mod tenant;

use std::future::Future;

use thiserror::Error;

use crate::config::{BackendKind, SyncConfig};
use crate::models::{Snapshot, SyncScope};

pub use self::blob::BlobStoreClient;
pub use self::memory::MemoryRemote;
pub use self::tenant::TenantApiClient;

/// Failure kinds reported by every remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(String),
    /// Missing, expired or rejected credential
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// The scope has never been written
    #[error("Remote scope not found: {0}")]
    NotFound(String),
    /// Any other non-success response
    #[error("Remote server error: {0}")]
    Server(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Whole-document read/write access to the snapshot stored for a scope.
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch the scope's snapshot; `Ok(None)` when it was never written.
    fn pull(
        &self,
        scope: &SyncScope,
    ) -> impl Future<Output = RemoteResult<Option<Snapshot>>> + Send;

    /// Replace the scope's snapshot with `snapshot`.
    fn push(
        &self,
        scope: &SyncScope,
        snapshot: &Snapshot,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Allocate a new remote location seeded with `initial`.
    fn create_scope(
        &self,
        initial: &Snapshot,
    ) -> impl Future<Output = RemoteResult<SyncScope>> + Send;

    /// Replace the credential used for subsequent calls.
    ///
    /// Anonymous backends ignore it.
    fn set_credential(&self, _credential: Option<&str>) {}
}

/// HTTP backend chosen at runtime from [`SyncConfig`].
#[derive(Debug, Clone)]
pub enum RemoteBackend {
    Blob(BlobStoreClient),
    Tenant(TenantApiClient),
}

impl RemoteBackend {
    pub fn from_config(config: &SyncConfig) -> RemoteResult<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            RemoteError::InvalidConfiguration("sync base URL is not configured".to_string())
        })?;

        match config.backend {
            BackendKind::Blob => Ok(Self::Blob(BlobStoreClient::new(
                base_url,
                config.request_timeout,
            )?)),
            BackendKind::Tenant => Ok(Self::Tenant(TenantApiClient::new(
                base_url,
                config.request_timeout,
            )?)),
        }
    }

    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Blob(_) => BackendKind::Blob,
            Self::Tenant(_) => BackendKind::Tenant,
        }
    }
}

impl RemoteStore for RemoteBackend {
    async fn pull(&self, scope: &SyncScope) -> RemoteResult<Option<Snapshot>> {
        match self {
            Self::Blob(client) => client.pull(scope).await,
            Self::Tenant(client) => client.pull(scope).await,
        }
    }

    async fn push(&self, scope: &SyncScope, snapshot: &Snapshot) -> RemoteResult<()> {
        match self {
            Self::Blob(client) => client.push(scope, snapshot).await,
            Self::Tenant(client) => client.push(scope, snapshot).await,
        }
    }

    async fn create_scope(&self, initial: &Snapshot) -> RemoteResult<SyncScope> {
        match self {
            Self::Blob(client) => client.create_scope(initial).await,
            Self::Tenant(client) => client.create_scope(initial).await,
        }
    }

    fn set_credential(&self, credential: Option<&str>) {
        match self {
            Self::Blob(client) => client.set_credential(credential),
            Self::Tenant(client) => client.set_credential(credential),
        }
    }
}
