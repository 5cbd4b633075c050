//! Authenticated multi-tenant API backend.
//!
//! Talks to `fleet-api`. Every request carries the session's bearer
//! credential; the server rejects callers that are not members of the scope.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

use super::http::{build_client, check_status, map_transport_error, normalize_base_url, read_json};
use super::{RemoteError, RemoteResult, RemoteStore};
use crate::models::{Snapshot, SyncScope};

#[derive(Clone)]
pub struct TenantApiClient {
    base_url: String,
    client: reqwest::Client,
    credential: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for TenantApiClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TenantApiClient")
            .field("base_url", &self.base_url)
            .field("credential", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl TenantApiClient {
    /// `base_url` includes the API version prefix, e.g. `https://host/v1`.
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            client: build_client(timeout)?,
            credential: Arc::new(RwLock::new(None)),
        })
    }

    fn fleets_url(&self) -> String {
        format!("{}/api/fleet", self.base_url)
    }

    fn fleet_url(&self, scope: &SyncScope) -> String {
        format!("{}/api/fleet/{}", self.base_url, scope.as_str())
    }

    fn bearer(&self) -> RemoteResult<String> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| RemoteError::Auth("no session credential".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct FleetDocument {
    #[serde(default)]
    payload: Option<Snapshot>,
}

#[derive(Debug, Serialize)]
struct FleetWrite<'a> {
    payload: &'a Snapshot,
}

#[derive(Debug, Deserialize)]
struct CreatedFleet {
    fleet_id: String,
}

impl RemoteStore for TenantApiClient {
    async fn pull(&self, scope: &SyncScope) -> RemoteResult<Option<Snapshot>> {
        let response = self
            .client
            .get(self.fleet_url(scope))
            .bearer_auth(self.bearer()?)
            .header(ACCEPT, "application/json")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;

        match check_status(response).await {
            Ok(response) => Ok(read_json::<FleetDocument>(response).await?.payload),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn push(&self, scope: &SyncScope, snapshot: &Snapshot) -> RemoteResult<()> {
        let response = self
            .client
            .post(self.fleet_url(scope))
            .bearer_auth(self.bearer()?)
            .header(ACCEPT, "application/json")
            .json(&FleetWrite { payload: snapshot })
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;

        check_status(response).await?;
        Ok(())
    }

    async fn create_scope(&self, initial: &Snapshot) -> RemoteResult<SyncScope> {
        let response = self
            .client
            .post(self.fleets_url())
            .bearer_auth(self.bearer()?)
            .header(ACCEPT, "application/json")
            .json(&FleetWrite { payload: initial })
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;

        let created: CreatedFleet = read_json(check_status(response).await?).await?;
        SyncScope::parse(&created.fleet_id).map_err(|error| {
            RemoteError::InvalidPayload(format!("server returned an unusable fleet id: {error}"))
        })
    }

    fn set_credential(&self, credential: Option<&str>) {
        let credential = credential
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credential;
    }
}
