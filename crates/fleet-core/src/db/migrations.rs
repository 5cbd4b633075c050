//! Versioned schema for the local store.

use crate::error::Result;
use libsql::Connection;

/// Ordered schema steps; a step runs once, when its version exceeds the
/// recorded one.
const MIGRATIONS: &[(i64, &[&str])] = &[(
    1,
    &["CREATE TABLE IF NOT EXISTS kv_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )"],
)];

pub async fn run(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        (),
    )
    .await?;

    let current = current_version(conn).await?;
    for (version, statements) in MIGRATIONS {
        if *version > current {
            apply(conn, *version, statements).await?;
        }
    }
    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

async fn apply(conn: &Connection, version: i64, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction().await?;
    for statement in statements {
        tx.execute(statement, ()).await?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        libsql::params![version],
    )
    .await?;
    tx.commit().await?;

    tracing::info!("Migrated local store to schema version {}", version);
    Ok(())
}
