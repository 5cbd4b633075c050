//! Server-side fleet documents and membership, kept in libSQL.

use chrono::Utc;
use libsql::{params, Builder, Connection, Database, Value};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;

/// Stored document for a single fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetRecord {
    /// `None` until the first snapshot is written.
    pub payload: Option<JsonValue>,
    pub last_updater: Option<String>,
    pub updated_at: Option<i64>,
}

/// Result of [`FleetStore::write_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetWrite {
    Stored { updated_at: i64, created: bool },
    NotMember,
}

/// Fleet tables behind a single libSQL connection.
///
/// Every statement holds the connection lock, so a transaction never
/// interleaves with another request's statements.
pub struct FleetStore {
    _db: Database,
    conn: Mutex<Connection>,
}

const INSERT_MEMBER: &str =
    "INSERT OR IGNORE INTO fleet_members (fleet_id, user_id, added_at) VALUES (?1, ?2, ?3)";

impl FleetStore {
    pub async fn open(path: &str) -> Result<Self, AppError> {
        let db = Builder::new_local(path).build().await?;
        Self::initialize(db).await
    }

    pub async fn open_in_memory() -> Result<Self, AppError> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::initialize(db).await
    }

    async fn initialize(db: Database) -> Result<Self, AppError> {
        let conn = db.connect()?;
        conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();

        for statement in [
            "CREATE TABLE IF NOT EXISTS fleets (
                id TEXT PRIMARY KEY,
                payload TEXT,
                last_updater TEXT,
                updated_at INTEGER
            )",
            "CREATE TABLE IF NOT EXISTS fleet_members (
                fleet_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (fleet_id, user_id)
            )",
        ] {
            conn.execute(statement, ()).await?;
        }

        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
        })
    }

    /// Create a fleet owned by `owner`, optionally storing an initial payload.
    pub async fn create_fleet(
        &self,
        owner: &str,
        payload: Option<&JsonValue>,
    ) -> Result<String, AppError> {
        let fleet_id = Uuid::now_v7().simple().to_string();
        let now = Utc::now().timestamp_millis();
        let (payload, last_updater, updated_at) = match payload {
            Some(payload) => (
                Value::Text(serde_json::to_string(payload)?),
                Value::Text(owner.to_string()),
                Value::Integer(now),
            ),
            None => (Value::Null, Value::Null, Value::Null),
        };

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT INTO fleets (id, payload, last_updater, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![fleet_id.as_str(), payload, last_updater, updated_at],
        )
        .await?;
        tx.execute(INSERT_MEMBER, params![fleet_id.as_str(), owner, now])
            .await?;
        tx.commit().await?;
        Ok(fleet_id)
    }

    pub async fn fleet_exists(&self, fleet_id: &str) -> Result<bool, AppError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT 1 FROM fleets WHERE id = ?1", params![fleet_id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn is_member(&self, fleet_id: &str, user_id: &str) -> Result<bool, AppError> {
        let conn = self.conn.lock().await;
        member_of(&conn, fleet_id, user_id).await
    }

    pub async fn add_member(&self, fleet_id: &str, user_id: &str) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute(
            INSERT_MEMBER,
            params![fleet_id, user_id, Utc::now().timestamp_millis()],
        )
        .await?;
        Ok(())
    }

    pub async fn load(&self, fleet_id: &str) -> Result<Option<FleetRecord>, AppError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT payload, last_updater, updated_at FROM fleets WHERE id = ?1",
                params![fleet_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let payload = match row.get::<Option<String>>(0)? {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Some(FleetRecord {
            payload,
            last_updater: row.get::<Option<String>>(1)?,
            updated_at: row.get::<Option<i64>>(2)?,
        }))
    }

    /// Replace the fleet document wholesale on behalf of `user_id`.
    ///
    /// An unknown fleet is created with `user_id` as its first member; an
    /// existing one only accepts writes from members. Creation, membership
    /// and payload commit together or not at all.
    pub async fn write_snapshot(
        &self,
        fleet_id: &str,
        user_id: &str,
        payload: &JsonValue,
    ) -> Result<FleetWrite, AppError> {
        let serialized = serde_json::to_string(payload)?;
        let updated_at = Utc::now().timestamp_millis();

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;
        let outcome = async {
            let created = tx
                .execute(
                    "INSERT INTO fleets (id) VALUES (?1) ON CONFLICT(id) DO NOTHING",
                    params![fleet_id],
                )
                .await?
                == 1;
            if created {
                tx.execute(INSERT_MEMBER, params![fleet_id, user_id, updated_at])
                    .await?;
            } else if !member_of(&tx, fleet_id, user_id).await? {
                return Ok(FleetWrite::NotMember);
            }

            tx.execute(
                "UPDATE fleets SET payload = ?2, last_updater = ?3, updated_at = ?4 WHERE id = ?1",
                params![fleet_id, serialized, user_id, updated_at],
            )
            .await?;
            Ok::<_, AppError>(FleetWrite::Stored {
                updated_at,
                created,
            })
        }
        .await;

        match outcome {
            Ok(write @ FleetWrite::Stored { .. }) => {
                tx.commit().await?;
                Ok(write)
            }
            other => {
                tx.rollback().await?;
                other
            }
        }
    }
}

async fn member_of(conn: &Connection, fleet_id: &str, user_id: &str) -> Result<bool, AppError> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM fleet_members WHERE fleet_id = ?1 AND user_id = ?2",
            params![fleet_id, user_id],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}
