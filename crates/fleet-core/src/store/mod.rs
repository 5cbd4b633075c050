//! Local persistent store.
//!
//! Every collection is stored under its own fixed key and serialized
//! independently, so a failed write cannot corrupt unrelated collections.
//! Loads never fail: absent or unparsable values fall back to the caller's
//! default.

mod libsql_store;
mod memory;

use std::future::Future;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Collection, Record, Snapshot, SyncScope};
use crate::sync::SyncBaseline;

pub use self::libsql_store::LibSqlStore;
pub use self::memory::MemoryStore;

const WRITE_TIMESTAMP_KEY: &str = "fleet_write_timestamp";
const BASELINE_KEY: &str = "fleet_sync_baseline";
const SCOPE_KEY: &str = "fleet_sync_scope";

/// Raw string storage addressed by logical key.
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Typed snapshot persistence on top of a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct SnapshotStore<S> {
    backend: S,
}

impl<S: KeyValueStore> SnapshotStore<S> {
    pub const fn new(backend: S) -> Self {
        Self { backend }
    }

    pub const fn backend(&self) -> &S {
        &self.backend
    }

    /// Load a value, returning `default` when it is absent or unparsable.
    pub async fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(error) => {
                tracing::warn!("Failed to read local key {}: {}", key, error);
                return default;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("Error parsing local key {}: {}", key, error);
                default
            }
        }
    }

    pub async fn save_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        self.backend.set(key, &serialized).await
    }

    /// Persist a single collection; other keys are left untouched.
    pub async fn save_collection(&self, collection: Collection, records: &[Record]) -> Result<()> {
        self.save_value(collection.storage_key(), records).await
    }

    /// Persist every collection plus the write timestamp.
    ///
    /// Each key is attempted even if an earlier one fails; the first error is
    /// returned.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut first_error = None;
        for collection in Collection::ALL {
            if let Err(error) = self
                .save_collection(collection, snapshot.collection(collection))
                .await
            {
                tracing::warn!("Failed to persist collection {}: {}", collection, error);
                first_error.get_or_insert(error);
            }
        }
        if let Err(error) = self.save_write_timestamp(snapshot.write_timestamp).await {
            first_error.get_or_insert(error);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Load the current snapshot, seeding missing collections from defaults.
    pub async fn load_snapshot(&self) -> Snapshot {
        let seeded = Snapshot::seeded(Utc::now().date_naive());
        let mut snapshot = Snapshot::default();
        for collection in Collection::ALL {
            let default = seeded.collection(collection).to_vec();
            let records = self.load(collection.storage_key(), default).await;
            snapshot.set_collection(collection, records);
        }
        snapshot.write_timestamp = self.load(WRITE_TIMESTAMP_KEY, 0).await;
        snapshot
    }

    pub async fn save_write_timestamp(&self, write_timestamp: i64) -> Result<()> {
        self.save_value(WRITE_TIMESTAMP_KEY, &write_timestamp).await
    }

    pub async fn load_baseline(&self) -> SyncBaseline {
        SyncBaseline::new(self.load(BASELINE_KEY, 0).await)
    }

    pub async fn save_baseline(&self, baseline: SyncBaseline) -> Result<()> {
        self.save_value(BASELINE_KEY, &baseline.timestamp()).await
    }

    pub async fn load_scope(&self) -> Option<SyncScope> {
        self.load(SCOPE_KEY, None).await
    }

    pub async fn save_scope(&self, scope: Option<&SyncScope>) -> Result<()> {
        match scope {
            Some(scope) => self.save_value(SCOPE_KEY, scope).await,
            None => self.backend.remove(SCOPE_KEY).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn store() -> SnapshotStore<MemoryStore> {
        SnapshotStore::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn first_run_loads_seeded_defaults() {
        let store = store();
        let snapshot = store.load_snapshot().await;

        assert!(snapshot.vehicles.is_empty());
        assert_eq!(snapshot.tariffs.len(), 2);
        assert_eq!(snapshot.write_timestamp, 0);
    }

    #[tokio::test]
    async fn save_then_load_returns_same_snapshot() {
        let store = store();
        let snapshot = Snapshot {
            vehicles: vec![json!({"id": "v1", "plate": "1234-ABC"})],
            workers: vec![json!({"id": "w1"})],
            ..Snapshot::default()
        }
        .with_timestamp(42);

        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load_snapshot().await, snapshot);
    }

    #[tokio::test]
    async fn unparsable_value_falls_back_to_default() {
        let store = store();
        store
            .backend()
            .set(Collection::Vehicles.storage_key(), "{not json")
            .await
            .unwrap();
        store
            .save_collection(Collection::Logs, &[json!({"id": "l1"})])
            .await
            .unwrap();

        let snapshot = store.load_snapshot().await;
        assert!(snapshot.vehicles.is_empty());
        assert_eq!(snapshot.logs, vec![json!({"id": "l1"})]);
    }

    #[tokio::test]
    async fn save_collection_writes_only_its_key() {
        let store = store();
        store
            .save_collection(Collection::Works, &[json!({"id": "o1"})])
            .await
            .unwrap();

        assert_eq!(store.backend().keys(), vec!["fleet_works".to_string()]);
    }

    #[tokio::test]
    async fn scope_and_baseline_roundtrip_and_clear() {
        let store = store();
        let scope = SyncScope::parse("alpha").unwrap();

        store.save_scope(Some(&scope)).await.unwrap();
        store.save_baseline(SyncBaseline::new(150)).await.unwrap();
        assert_eq!(store.load_scope().await, Some(scope));
        assert_eq!(store.load_baseline().await.timestamp(), 150);

        store.save_scope(None).await.unwrap();
        assert_eq!(store.load_scope().await, None);
    }
}
