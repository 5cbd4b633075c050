//! Durable key/value store backed by a local libSQL file.

use std::path::Path;
use std::sync::Arc;

use super::KeyValueStore;
use crate::db::{Database, LibSqlKvRepository};
use crate::error::Result;

/// [`KeyValueStore`] persisted in the `kv_store` table.
#[derive(Clone)]
pub struct LibSqlStore {
    db: Arc<Database>,
}

impl LibSqlStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path).await?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self { db: Arc::new(db) })
    }

    fn repository(&self) -> LibSqlKvRepository<'_> {
        LibSqlKvRepository::new(self.db.connection())
    }
}

impl KeyValueStore for LibSqlStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.repository().get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.repository().set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.repository().remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::models::{Collection, Snapshot};
    use crate::store::SnapshotStore;

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("fleet.db");
        let snapshot = Snapshot {
            vehicles: vec![json!({"id": "v1"})],
            ..Snapshot::default()
        }
        .with_timestamp(1_700_000_000_000);

        {
            let store = SnapshotStore::new(LibSqlStore::open(&path).await.unwrap());
            store.save(&snapshot).await.unwrap();
        }

        let reopened = SnapshotStore::new(LibSqlStore::open(&path).await.unwrap());
        assert_eq!(reopened.load_snapshot().await, snapshot);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupt_collection_does_not_affect_others() {
        let store = SnapshotStore::new(LibSqlStore::open_in_memory().await.unwrap());
        store
            .save_collection(Collection::Workers, &[json!({"id": "w1"})])
            .await
            .unwrap();
        store
            .backend()
            .set(Collection::Logs.storage_key(), "[{broken")
            .await
            .unwrap();

        let loaded = store.load_snapshot().await;
        assert_eq!(loaded.workers, vec![json!({"id": "w1"})]);
        assert!(loaded.logs.is_empty());
    }
}
