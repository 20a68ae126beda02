//! Append-only sensor time series.
//!
//! Rows are keyed `(user_id, cabinet_id, timestamp_millis, seq)`. The
//! sequence number is a process-local counter whose only job is to keep
//! two samples with the same millisecond timestamp as distinct rows;
//! the key order makes "latest" a reverse range scan.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{open_database, Error, Result};

type SeriesKey<'a> = (&'a str, &'a str, i64, u64);

const TEMPERATURE_TABLE: TableDefinition<SeriesKey, f64> = TableDefinition::new("temperature");
const HUMIDITY_TABLE: TableDefinition<SeriesKey, f64> = TableDefinition::new("humidity");
// Location rows carry a coordinate pair, stored as JSON.
const LOCATION_TABLE: TableDefinition<SeriesKey, &str> = TableDefinition::new("location");

/// Kinds of sensor series a cabinet reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Location,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Location => "location",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar sample (temperature or humidity).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalarReading {
    pub timestamp: i64,
    pub value: f64,
}

/// A location sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationReading {
    pub timestamp: i64,
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize)]
struct LocationRow {
    x: f64,
    y: f64,
}

/// Sensor time-series store backed by redb.
pub struct SensorStore {
    db: Arc<Database>,
    seq: AtomicU64,
}

impl SensorStore {
    /// Open or create the sensor store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TEMPERATURE_TABLE)?;
            let _ = write_txn.open_table(HUMIDITY_TABLE)?;
            let _ = write_txn.open_table(LOCATION_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self {
            db: Arc::new(db),
            seq: AtomicU64::new(0),
        })
    }

    fn scalar_table(kind: SensorKind) -> Result<TableDefinition<'static, SeriesKey<'static>, f64>> {
        match kind {
            SensorKind::Temperature => Ok(TEMPERATURE_TABLE),
            SensorKind::Humidity => Ok(HUMIDITY_TABLE),
            SensorKind::Location => Err(Error::InvalidInput(
                "location is not a scalar series".to_string(),
            )),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Append a temperature or humidity sample. Samples are never
    /// deduplicated; equal timestamps are distinct readings.
    pub fn append_scalar(
        &self,
        kind: SensorKind,
        user_id: &str,
        cabinet_id: &str,
        value: f64,
        timestamp: i64,
    ) -> Result<()> {
        let table_def = Self::scalar_table(kind)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            table.insert((user_id, cabinet_id, timestamp, self.next_seq()), value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Append a location sample.
    pub fn append_location(
        &self,
        user_id: &str,
        cabinet_id: &str,
        x: f64,
        y: f64,
        timestamp: i64,
    ) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LOCATION_TABLE)?;
            let json = serde_json::to_string(&LocationRow { x, y })?;
            table.insert(
                (user_id, cabinet_id, timestamp, self.next_seq()),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Most recent scalar sample, by timestamp.
    pub fn latest_scalar(
        &self,
        kind: SensorKind,
        user_id: &str,
        cabinet_id: &str,
    ) -> Result<Option<ScalarReading>> {
        let table_def = Self::scalar_table(kind)?;
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let mut range = table.range(
            (user_id, cabinet_id, i64::MIN, u64::MIN)..=(user_id, cabinet_id, i64::MAX, u64::MAX),
        )?;
        match range.next_back() {
            Some(result) => {
                let (key, value) = result?;
                let (_, _, timestamp, _) = key.value();
                Ok(Some(ScalarReading {
                    timestamp,
                    value: value.value(),
                }))
            }
            None => Ok(None),
        }
    }

    /// Most recent location sample.
    pub fn latest_location(
        &self,
        user_id: &str,
        cabinet_id: &str,
    ) -> Result<Option<LocationReading>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOCATION_TABLE)?;
        let mut range = table.range(
            (user_id, cabinet_id, i64::MIN, u64::MIN)..=(user_id, cabinet_id, i64::MAX, u64::MAX),
        )?;
        match range.next_back() {
            Some(result) => {
                let (key, value) = result?;
                let (_, _, timestamp, _) = key.value();
                let row: LocationRow = serde_json::from_str(value.value())?;
                Ok(Some(LocationReading {
                    timestamp,
                    x: row.x,
                    y: row.y,
                }))
            }
            None => Ok(None),
        }
    }

    /// Scalar samples in `[start, end]`, oldest first.
    pub fn query_scalars(
        &self,
        kind: SensorKind,
        user_id: &str,
        cabinet_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<ScalarReading>> {
        let table_def = Self::scalar_table(kind)?;
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let mut readings = Vec::new();
        for result in
            table.range((user_id, cabinet_id, start, u64::MIN)..=(user_id, cabinet_id, end, u64::MAX))?
        {
            let (key, value) = result?;
            let (_, _, timestamp, _) = key.value();
            readings.push(ScalarReading {
                timestamp,
                value: value.value(),
            });
        }
        Ok(readings)
    }

    /// Location samples in `[start, end]`, oldest first.
    pub fn query_locations(
        &self,
        user_id: &str,
        cabinet_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<LocationReading>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOCATION_TABLE)?;
        let mut readings = Vec::new();
        for result in
            table.range((user_id, cabinet_id, start, u64::MIN)..=(user_id, cabinet_id, end, u64::MAX))?
        {
            let (key, value) = result?;
            let (_, _, timestamp, _) = key.value();
            let row: LocationRow = serde_json::from_str(value.value())?;
            readings.push(LocationReading {
                timestamp,
                x: row.x,
                y: row.y,
            });
        }
        Ok(readings)
    }

    /// Number of scalar samples for a cabinet.
    pub fn count_scalars(
        &self,
        kind: SensorKind,
        user_id: &str,
        cabinet_id: &str,
    ) -> Result<usize> {
        Ok(self
            .query_scalars(kind, user_id, cabinet_id, i64::MIN, i64::MAX)?
            .len())
    }

    /// Remove every sample of a cabinet (cascade path).
    pub fn delete_for_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TEMPERATURE_TABLE)?;
            for (timestamp, seq) in Self::series_keys(&table, user_id, cabinet_id)? {
                table.remove((user_id, cabinet_id, timestamp, seq))?;
            }
            let mut table = write_txn.open_table(HUMIDITY_TABLE)?;
            for (timestamp, seq) in Self::series_keys(&table, user_id, cabinet_id)? {
                table.remove((user_id, cabinet_id, timestamp, seq))?;
            }
        }
        {
            let mut table = write_txn.open_table(LOCATION_TABLE)?;
            let keys: Vec<(i64, u64)> = {
                let mut keys = Vec::new();
                for result in table.range(
                    (user_id, cabinet_id, i64::MIN, u64::MIN)
                        ..=(user_id, cabinet_id, i64::MAX, u64::MAX),
                )? {
                    let (key, _value) = result?;
                    let (_, _, timestamp, seq) = key.value();
                    keys.push((timestamp, seq));
                }
                keys
            };
            for (timestamp, seq) in keys {
                table.remove((user_id, cabinet_id, timestamp, seq))?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn series_keys<T: redb::ReadableTable<SeriesKey<'static>, f64>>(
        table: &T,
        user_id: &str,
        cabinet_id: &str,
    ) -> Result<Vec<(i64, u64)>> {
        let mut keys = Vec::new();
        for result in table.range(
            (user_id, cabinet_id, i64::MIN, u64::MIN)..=(user_id, cabinet_id, i64::MAX, u64::MAX),
        )? {
            let (key, _value) = result?;
            let (_, _, timestamp, seq) = key.value();
            keys.push((timestamp, seq));
        }
        Ok(keys)
    }
}
