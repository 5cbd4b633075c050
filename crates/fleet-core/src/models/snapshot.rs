//! Snapshot model: the unit of replication.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Error;

/// An opaque domain record (vehicle, worker, trip log, ...).
///
/// The sync engine never inspects record fields.
pub type Record = serde_json::Value;

/// Domain collections carried by a [`Snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Vehicles,
    Workers,
    Works,
    Logs,
    Tariffs,
}

impl Collection {
    /// Every collection, in wire order.
    pub const ALL: [Self; 5] = [
        Self::Vehicles,
        Self::Workers,
        Self::Works,
        Self::Logs,
        Self::Tariffs,
    ];

    /// Fixed local storage key for this collection.
    #[must_use]
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::Vehicles => "fleet_vehicles",
            Self::Workers => "fleet_workers",
            Self::Works => "fleet_works",
            Self::Logs => "fleet_logs",
            Self::Tariffs => "fleet_price_history",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Vehicles => "vehicles",
            Self::Workers => "workers",
            Self::Works => "works",
            Self::Logs => "logs",
            Self::Tariffs => "tariffs",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vehicles" => Ok(Self::Vehicles),
            "workers" => Ok(Self::Workers),
            "works" => Ok(Self::Works),
            "logs" => Ok(Self::Logs),
            "tariffs" | "price_history" => Ok(Self::Tariffs),
            other => Err(Error::InvalidInput(format!("unknown collection '{other}'"))),
        }
    }
}

/// Serializable aggregate of every domain collection plus a logical write timestamp.
///
/// A snapshot is only ever replaced wholesale; records from two snapshots are
/// never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub vehicles: Vec<Record>,
    #[serde(default)]
    pub workers: Vec<Record>,
    #[serde(default)]
    pub works: Vec<Record>,
    #[serde(default)]
    pub logs: Vec<Record>,
    #[serde(default)]
    pub tariffs: Vec<Record>,
    /// Logical write timestamp (Unix ms of the device that produced it)
    #[serde(default)]
    pub write_timestamp: i64,
}

impl Snapshot {
    /// Built-in first-run dataset: empty collections and the default tariffs.
    #[must_use]
    pub fn seeded(today: NaiveDate) -> Self {
        Self {
            tariffs: default_tariffs(today),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn collection(&self, collection: Collection) -> &[Record] {
        match collection {
            Collection::Vehicles => &self.vehicles,
            Collection::Workers => &self.workers,
            Collection::Works => &self.works,
            Collection::Logs => &self.logs,
            Collection::Tariffs => &self.tariffs,
        }
    }

    pub fn set_collection(&mut self, collection: Collection, records: Vec<Record>) {
        let slot = match collection {
            Collection::Vehicles => &mut self.vehicles,
            Collection::Workers => &mut self.workers,
            Collection::Works => &mut self.works,
            Collection::Logs => &mut self.logs,
            Collection::Tariffs => &mut self.tariffs,
        };
        *slot = records;
    }

    #[must_use]
    pub fn with_timestamp(mut self, write_timestamp: i64) -> Self {
        self.write_timestamp = write_timestamp;
        self
    }

    /// Record count per collection, in wire order.
    #[must_use]
    pub fn record_counts(&self) -> Vec<(Collection, usize)> {
        Collection::ALL
            .iter()
            .map(|collection| (*collection, self.collection(*collection).len()))
            .collect()
    }

    /// Compare collection contents, ignoring the write timestamp.
    #[must_use]
    pub fn same_records(&self, other: &Self) -> bool {
        Collection::ALL
            .iter()
            .all(|collection| self.collection(*collection) == other.collection(*collection))
    }
}

fn default_tariffs(today: NaiveDate) -> Vec<Record> {
    vec![
        json!({
            "id": "p_now",
            "date": today.format("%Y-%m-%d").to_string(),
            "fuelPrice": 1.70,
            "costPerKm": 0.15,
        }),
        json!({
            "id": "p1",
            "date": "2024-01-01",
            "fuelPrice": 1.55,
            "costPerKm": 0.12,
        }),
    ]
}
