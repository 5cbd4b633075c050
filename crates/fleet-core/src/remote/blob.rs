//! Anonymous JSON blob store backend.
//!
//! A scope is the blob identifier minted by the service on creation. The
//! snapshot is stored unwrapped as the blob body.

use std::time::Duration;

use reqwest::header::{ACCEPT, LOCATION};
use serde::Deserialize;
use url::Url;

use super::http::{build_client, check_status, map_transport_error, normalize_base_url, read_json};
use super::{RemoteError, RemoteResult, RemoteStore};
use crate::models::{Snapshot, SyncScope};

#[derive(Debug, Clone)]
pub struct BlobStoreClient {
    base_url: String,
    client: reqwest::Client,
}

impl BlobStoreClient {
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            client: build_client(timeout)?,
        })
    }

    fn blob_url(&self, scope: &SyncScope) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(scope.as_str()))
    }
}

impl RemoteStore for BlobStoreClient {
    async fn pull(&self, scope: &SyncScope) -> RemoteResult<Option<Snapshot>> {
        let response = self
            .client
            .get(self.blob_url(scope))
            .header(ACCEPT, "application/json")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;

        match check_status(response).await {
            Ok(response) => read_json::<Option<Snapshot>>(response).await,
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn push(&self, scope: &SyncScope, snapshot: &Snapshot) -> RemoteResult<()> {
        let response = self
            .client
            .put(self.blob_url(scope))
            .header(ACCEPT, "application/json")
            .json(snapshot)
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;

        check_status(response).await?;
        Ok(())
    }

    async fn create_scope(&self, initial: &Snapshot) -> RemoteResult<SyncScope> {
        let response = self
            .client
            .post(&self.base_url)
            .header(ACCEPT, "application/json")
            .json(initial)
            .send()
            .await
            .map_err(|error| map_transport_error(&error))?;
        let response = check_status(response).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        if let Some(id) =
            location.and_then(|location| blob_id_from_location(&self.base_url, &location))
        {
            return scope_from_id(&id);
        }

        let body: CreatedBlob = read_json(response).await?;
        let id = body
            .id
            .or_else(|| {
                body.uri
                    .and_then(|uri| blob_id_from_location(&self.base_url, &uri))
            })
            .ok_or_else(|| {
                RemoteError::InvalidPayload(
                    "blob creation response did not include Location, id or uri".to_string(),
                )
            })?;
        scope_from_id(&id)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedBlob {
    id: Option<String>,
    uri: Option<String>,
}

/// Last non-empty path segment of `location`, resolved against `base_url`.
fn blob_id_from_location(base_url: &str, location: &str) -> Option<String> {
    let base = Url::parse(&format!("{base_url}/")).ok()?;
    let resolved = base.join(location.trim()).ok()?;
    let segment = resolved
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?;
    urlencoding::decode(segment)
        .ok()
        .map(std::borrow::Cow::into_owned)
}

fn scope_from_id(id: &str) -> RemoteResult<SyncScope> {
    SyncScope::parse(id).map_err(|error| {
        RemoteError::InvalidPayload(format!("blob id '{id}' is not a usable scope: {error}"))
    })
}
