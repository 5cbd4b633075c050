//! Backup files and human-readable snapshot summaries.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::Snapshot;

pub const BACKUP_VERSION: u32 = 1;

/// On-disk backup envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    /// Unix milliseconds at export time
    pub exported_at: i64,
    pub snapshot: Snapshot,
}

/// Render `snapshot` as a pretty-printed backup document.
pub fn render_backup(snapshot: &Snapshot, exported_at: i64) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&Backup {
        version: BACKUP_VERSION,
        exported_at,
        snapshot: snapshot.clone(),
    })
}

/// Parse a backup file.
///
/// Accepts the versioned envelope or a bare snapshot document.
pub fn parse_backup(raw: &str) -> Result<Snapshot> {
    let value: Value = serde_json::from_str(raw)?;
    let is_envelope = value
        .as_object()
        .is_some_and(|object| object.contains_key("snapshot") && object.contains_key("version"));
    if !is_envelope {
        if !value.is_object() {
            return Err(Error::InvalidInput(
                "backup must be a JSON object".to_string(),
            ));
        }
        return Ok(serde_json::from_value(value)?);
    }

    let backup: Backup = serde_json::from_value(value)?;
    if backup.version > BACKUP_VERSION {
        return Err(Error::InvalidInput(format!(
            "unsupported backup version {} (expected {BACKUP_VERSION} or older)",
            backup.version
        )));
    }
    Ok(backup.snapshot)
}

/// One line per collection plus the write timestamp.
#[must_use]
pub fn render_summary(snapshot: &Snapshot) -> String {
    let mut output = String::new();
    for (collection, count) in snapshot.record_counts() {
        let _ = writeln!(output, "{collection:<10} {count}");
    }
    let _ = writeln!(output, "{:<10} {}", "written", snapshot.write_timestamp);
    output
}

/// Build a deterministic default file name for backups.
#[must_use]
pub fn suggested_backup_file_name(timestamp_ms: i64) -> String {
    format!("fleet-backup-{timestamp_ms}.json")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            workers: vec![json!({"id": "w1", "name": "Ana"})],
            ..Snapshot::default()
        }
        .with_timestamp(77)
    }

    #[test]
    fn backup_roundtrips_through_envelope() {
        let rendered = render_backup(&sample(), 1_000).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["exported_at"], json!(1_000));
        assert_eq!(value["snapshot"]["writeTimestamp"], json!(77));

        assert_eq!(parse_backup(&rendered).unwrap(), sample());
    }

    #[test]
    fn bare_snapshot_is_accepted() {
        let raw = r#"{"workers":[{"id":"w1","name":"Ana"}],"writeTimestamp":77}"#;
        assert_eq!(parse_backup(raw).unwrap(), sample());
    }

    #[test]
    fn newer_or_malformed_backups_are_rejected() {
        let future = r#"{"version":9,"exported_at":1,"snapshot":{}}"#;
        assert!(parse_backup(future)
            .unwrap_err()
            .to_string()
            .contains("unsupported backup version"));
        assert!(parse_backup("[1,2,3]").is_err());
        assert!(parse_backup("not json").is_err());
    }

    #[test]
    fn summary_lists_every_collection() {
        let summary = render_summary(&sample());
        assert!(summary.contains("workers    1"));
        assert!(summary.contains("tariffs    0"));
        assert!(summary.contains("written    77"));
    }

    #[test]
    fn suggested_file_name_is_stable() {
        assert_eq!(suggested_backup_file_name(123), "fleet-backup-123.json");
    }
}
