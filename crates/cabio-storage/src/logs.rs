//! Append-only activity audit trail.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{open_database, Result};

// Logs table: key = (user_id, cabinet_id, timestamp_millis, seq), value = activity text.
const LOGS_TABLE: TableDefinition<(&str, &str, i64, u64), &str> = TableDefinition::new("logs");

/// One audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub activity: String,
    pub timestamp: i64,
}

/// Activity log store backed by redb.
pub struct LogStore {
    db: Arc<Database>,
    seq: AtomicU64,
}

impl LogStore {
    /// Open or create the log store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LOGS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self {
            db: Arc::new(db),
            seq: AtomicU64::new(0),
        })
    }

    /// Append an entry. The trail is never updated in place.
    pub fn append(
        &self,
        user_id: &str,
        cabinet_id: &str,
        activity: &str,
        timestamp: i64,
    ) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LOGS_TABLE)?;
            table.insert((user_id, cabinet_id, timestamp, seq), activity)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Most recent entries first, at most `limit`.
    pub fn list_recent(
        &self,
        user_id: &str,
        cabinet_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOGS_TABLE)?;
        let range = table.range(
            (user_id, cabinet_id, i64::MIN, u64::MIN)..=(user_id, cabinet_id, i64::MAX, u64::MAX),
        )?;
        let mut entries = Vec::new();
        for result in range.rev().take(limit) {
            let (key, value) = result?;
            let (_, _, timestamp, _) = key.value();
            entries.push(ActivityEntry {
                activity: value.value().to_string(),
                timestamp,
            });
        }
        Ok(entries)
    }

    /// Number of entries for a cabinet.
    pub fn count(&self, user_id: &str, cabinet_id: &str) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOGS_TABLE)?;
        let range = table.range(
            (user_id, cabinet_id, i64::MIN, u64::MIN)..=(user_id, cabinet_id, i64::MAX, u64::MAX),
        )?;
        Ok(range.count())
    }

    /// Remove every entry of a cabinet (cascade path).
    pub fn delete_for_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LOGS_TABLE)?;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_list_recent() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path().join("logs.redb")).unwrap();

        store.append("u1", "c1", "Relay 4 ON", 1000).unwrap();
        store.append("u1", "c1", "Relay 4 OFF", 2000).unwrap();
        store.append("u1", "c1", "Relay 2 ON", 3000).unwrap();

        let entries = store.list_recent("u1", "c1", 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].activity, "Relay 2 ON");
        assert_eq!(entries[1].activity, "Relay 4 OFF");
    }

    #[test]
    fn test_same_timestamp_entries_kept() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::open(dir.path().join("logs.redb")).unwrap();

        store.append("u1", "c1", "a", 1000).unwrap();
        store.append("u1", "c1", "b", 1000).unwrap();
        assert_eq!(store.count("u1", "c1").unwrap(), 2);
    }
}
