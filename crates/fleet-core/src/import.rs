//! One-shot import through a shareable locator.
//!
//! A snapshot is serialized to JSON, gzip-compressed and base64url-encoded
//! into the locator fragment (`#import=<payload>`). Importing is a manual,
//! confirmed seed of the local store; it never engages the sync schedule.

use std::io::{Read, Write};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use url::Url;

use crate::error::{Error, Result};
use crate::models::{Collection, Snapshot};
use crate::store::{KeyValueStore, SnapshotStore};

const FRAGMENT_KEY: &str = "import";

/// Largest decompressed payload accepted from a locator.
pub const MAX_IMPORT_BYTES: u64 = 8 * 1024 * 1024;

/// Build `base_url#import=<payload>` for `snapshot`.
pub fn encode_share_locator(base_url: &str, snapshot: &Snapshot) -> Result<String> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|error| Error::InvalidInput(format!("invalid share base URL: {error}")))?;

    let json = serde_json::to_vec(snapshot)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let payload = URL_SAFE_NO_PAD.encode(compressed);
    url.set_fragment(Some(&format!("{FRAGMENT_KEY}={payload}")));
    Ok(url.into())
}

/// A decoded snapshot waiting for the user to confirm the import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOffer {
    snapshot: Snapshot,
}

impl ImportOffer {
    /// Decode the offer carried by `locator`, if any.
    ///
    /// `locator` may be a full URL or a bare fragment (`#import=...`).
    /// Returns `Ok(None)` when no import payload is present and an error
    /// when one is present but cannot be decoded.
    pub fn from_locator(locator: &str) -> Result<Option<Self>> {
        let locator = locator.trim();
        let fragment = match Url::parse(locator) {
            Ok(url) => url.fragment().map(ToString::to_string),
            Err(_) => locator.strip_prefix('#').map(ToString::to_string),
        };
        let Some(payload) = fragment.as_deref().and_then(import_payload) else {
            return Ok(None);
        };

        decode_payload(payload).map(|snapshot| Some(Self { snapshot }))
    }

    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Record count per collection, for the confirmation prompt.
    pub fn summary(&self) -> Vec<(Collection, usize)> {
        self.snapshot.record_counts()
    }

    /// Write the offered collections straight into the local store.
    ///
    /// The stored write timestamp, scope and baseline are left as they are,
    /// so the next sync treats the import as ordinary local data.
    pub async fn seed_store<S: KeyValueStore>(&self, store: &SnapshotStore<S>) -> Result<()> {
        let mut first_error = None;
        for collection in Collection::ALL {
            if let Err(error) = store
                .save_collection(collection, self.snapshot.collection(collection))
                .await
            {
                tracing::warn!("Failed to import collection {}: {}", collection, error);
                first_error.get_or_insert(error);
            }
        }
        if first_error.is_none() {
            tracing::info!("Imported snapshot into local store");
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }
}

fn import_payload(fragment: &str) -> Option<&str> {
    fragment
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == FRAGMENT_KEY)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

fn decode_payload(payload: &str) -> Result<Snapshot> {
    let compressed = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|error| Error::Import(format!("payload is not valid base64url: {error}")))?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .take(MAX_IMPORT_BYTES + 1)
        .read_to_end(&mut json)
        .map_err(|error| Error::Import(format!("payload is not valid gzip: {error}")))?;
    if json.len() as u64 > MAX_IMPORT_BYTES {
        return Err(Error::Import(format!(
            "payload exceeds {MAX_IMPORT_BYTES} bytes once decompressed"
        )));
    }

    serde_json::from_slice(&json)
        .map_err(|error| Error::Import(format!("payload is not a snapshot: {error}")))
}
