//! Board firmware versions, upserted per (user, cabinet, board).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::cabinets::BoardKind;
use crate::{open_database, Result};

// Boards table: key = (user_id, cabinet_id, board name), value = BoardFirmware (JSON).
// The key IS the uniqueness constraint: an upsert can never duplicate a row.
const BOARDS_TABLE: TableDefinition<(&str, &str, &str), &str> = TableDefinition::new("boards");

/// Firmware state of one board in a cabinet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardFirmware {
    pub board: BoardKind,
    pub version: String,
    pub updated_at: i64,
}

/// Board firmware store backed by redb.
pub struct BoardStore {
    db: Arc<Database>,
}

impl BoardStore {
    /// Open or create the board store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BOARDS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Insert or update the firmware row for a board.
    pub fn upsert(
        &self,
        user_id: &str,
        cabinet_id: &str,
        board: BoardKind,
        version: &str,
        timestamp: i64,
    ) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(BOARDS_TABLE)?;
            let row = BoardFirmware {
                board,
                version: version.to_string(),
                updated_at: timestamp,
            };
            let json = serde_json::to_string(&row)?;
            table.insert((user_id, cabinet_id, board.as_str()), json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the firmware row for one board.
    pub fn get(
        &self,
        user_id: &str,
        cabinet_id: &str,
        board: BoardKind,
    ) -> Result<Option<BoardFirmware>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BOARDS_TABLE)?;
        match table.get((user_id, cabinet_id, board.as_str()))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// List the boards known for a cabinet.
    pub fn list_for_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<Vec<BoardFirmware>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BOARDS_TABLE)?;
        let mut boards = Vec::new();
        for result in
            table.range((user_id, cabinet_id, "")..=(user_id, cabinet_id, "\u{10ffff}"))?
        {
            let (_key, value) = result?;
            if let Ok(board) = serde_json::from_str::<BoardFirmware>(value.value()) {
                boards.push(board);
            }
        }
        Ok(boards)
    }

    /// Remove every board row of a cabinet (cascade path).
    pub fn delete_for_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<()> {
        let names: Vec<String> = self
            .list_for_cabinet(user_id, cabinet_id)?
            .into_iter()
            .map(|b| b.board.as_str().to_string())
            .collect();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(BOARDS_TABLE)?;
            for name in &names {
                table.remove((user_id, cabinet_id, name.as_str()))?;
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
    fn test_upsert_keeps_single_row() {
        let dir = TempDir::new().unwrap();
        let store = BoardStore::open(dir.path().join("boards.redb")).unwrap();

        store
            .upsert("u1", "c1", BoardKind::Relay6ch, "1.0.0", 1000)
            .unwrap();
        assert_eq!(store.list_for_cabinet("u1", "c1").unwrap().len(), 1);

        store
            .upsert("u1", "c1", BoardKind::Relay6ch, "1.1.0", 2000)
            .unwrap();
        let boards = store.list_for_cabinet("u1", "c1").unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].version, "1.1.0");
        assert_eq!(boards[0].updated_at, 2000);
    }

    #[test]
    fn test_boards_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = BoardStore::open(dir.path().join("boards.redb")).unwrap();

        store
            .upsert("u1", "c1", BoardKind::Relay6ch, "1.0.0", 1000)
            .unwrap();
        store
            .upsert("u1", "c1", BoardKind::YoloUno, "2.0.0", 1000)
            .unwrap();

        assert_eq!(store.list_for_cabinet("u1", "c1").unwrap().len(), 2);
        assert_eq!(
            store
                .get("u1", "c1", BoardKind::YoloUno)
                .unwrap()
                .unwrap()
                .version,
            "2.0.0"
        );
    }
}
