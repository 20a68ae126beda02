//! Last-known network address per cabinet.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{open_database, Result};

// Network table: key = (user_id, cabinet_id), value = NetworkInfo (JSON)
const NETWORK_TABLE: TableDefinition<(&str, &str), &str> = TableDefinition::new("network");

/// The address a cabinet last reported on the ip feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip: String,
    pub updated_at: i64,
}

/// Network info store backed by redb.
pub struct NetworkStore {
    db: Arc<Database>,
}

impl NetworkStore {
    /// Open or create the network store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(NETWORK_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Record the cabinet's current address.
    pub fn upsert(&self, user_id: &str, cabinet_id: &str, ip: &str, timestamp: i64) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NETWORK_TABLE)?;
            let row = NetworkInfo {
                ip: ip.to_string(),
                updated_at: timestamp,
            };
            let json = serde_json::to_string(&row)?;
            table.insert((user_id, cabinet_id), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Last-known address, if any.
    pub fn get(&self, user_id: &str, cabinet_id: &str) -> Result<Option<NetworkInfo>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NETWORK_TABLE)?;
        match table.get((user_id, cabinet_id))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Remove the cabinet's row (cascade path).
    pub fn delete_for_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NETWORK_TABLE)?;
            table.remove((user_id, cabinet_id))?;
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
    fn test_upsert_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = NetworkStore::open(dir.path().join("network.redb")).unwrap();

        store.upsert("u1", "c1", "10.0.0.5", 1000).unwrap();
        store.upsert("u1", "c1", "10.0.0.9", 2000).unwrap();

        let info = store.get("u1", "c1").unwrap().unwrap();
        assert_eq!(info.ip, "10.0.0.9");
        assert_eq!(info.updated_at, 2000);
    }

    #[test]
    fn test_missing_row() {
        let dir = TempDir::new().unwrap();
        let store = NetworkStore::open(dir.path().join("network.redb")).unwrap();
        assert!(store.get("u1", "c1").unwrap().is_none());
    }
}
