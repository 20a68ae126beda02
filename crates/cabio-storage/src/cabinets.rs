//! Cabinet records, with a device index enforcing one cabinet per
//! (user, device identifier).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{open_database, Error, Result};

// Cabinets table: key = (user_id, cabinet_id), value = Cabinet (JSON)
const CABINETS_TABLE: TableDefinition<(&str, &str), &str> = TableDefinition::new("cabinets");

// Device index: key = (user_id, device_id), value = cabinet_id.
// This is the uniqueness constraint that settles concurrent provisioning.
const DEVICE_INDEX: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("cabinets_by_device");

/// Controller board installed in a cabinet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum BoardKind {
    #[default]
    #[serde(rename = "Yolo Uno")]
    YoloUno,
    #[serde(rename = "Relay 6ch")]
    Relay6ch,
}

impl BoardKind {
    /// Canonical name, as reported by devices on the firmware feed.
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardKind::YoloUno => "Yolo Uno",
            BoardKind::Relay6ch => "Relay 6ch",
        }
    }

    /// Parse a device-reported board name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Yolo Uno" => Some(BoardKind::YoloUno),
            "Relay 6ch" => Some(BoardKind::Relay6ch),
            _ => None,
        }
    }
}

impl std::fmt::Display for BoardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical cabinet owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cabinet {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub board: BoardKind,
    /// Device identifier announced over the registration feed. Manually
    /// created cabinets may not have one yet.
    #[serde(default)]
    pub device_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outcome of `create_if_absent`.
#[derive(Debug, Clone)]
pub enum Provisioned {
    /// A new cabinet row was written.
    Created(Cabinet),
    /// The device already had a cabinet; the existing row is returned.
    Existing(Cabinet),
}

impl Provisioned {
    /// The cabinet, whichever way it was obtained.
    pub fn into_cabinet(self) -> Cabinet {
        match self {
            Provisioned::Created(c) | Provisioned::Existing(c) => c,
        }
    }
}

/// Cabinet store backed by redb.
pub struct CabinetStore {
    db: Arc<Database>,
}

impl CabinetStore {
    /// Open or create the cabinet store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CABINETS_TABLE)?;
            let _ = write_txn.open_table(DEVICE_INDEX)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a cabinet. When a device id is set, it must not already be
    /// bound to another cabinet of the same user.
    pub fn create(&self, cabinet: &Cabinet) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CABINETS_TABLE)?;
            let mut index = write_txn.open_table(DEVICE_INDEX)?;

            if let Some(device_id) = &cabinet.device_id {
                if index
                    .get((cabinet.user_id.as_str(), device_id.as_str()))?
                    .is_some()
                {
                    return Err(Error::Conflict("device_id".to_string()));
                }
                index.insert(
                    (cabinet.user_id.as_str(), device_id.as_str()),
                    cabinet.id.as_str(),
                )?;
            }

            let json = serde_json::to_string(cabinet)?;
            table.insert(
                (cabinet.user_id.as_str(), cabinet.id.as_str()),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Insert a cabinet for a device unless the device is already bound.
    ///
    /// The index check and the insert happen in one write transaction, so
    /// two racing provisioning events cannot both create a row: the loser
    /// gets `Provisioned::Existing` back instead of an error.
    pub fn create_if_absent(&self, cabinet: Cabinet) -> Result<Provisioned> {
        let device_id = match &cabinet.device_id {
            Some(id) => id.clone(),
            None => return Err(Error::InvalidInput("device_id required".to_string())),
        };

        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(CABINETS_TABLE)?;
            let mut index = write_txn.open_table(DEVICE_INDEX)?;

            let existing_id = index
                .get((cabinet.user_id.as_str(), device_id.as_str()))?
                .map(|v| v.value().to_string());

            match existing_id {
                Some(cabinet_id) => {
                    let existing = match table.get((cabinet.user_id.as_str(), cabinet_id.as_str()))? {
                        Some(value) => serde_json::from_str(value.value())?,
                        None => {
                            return Err(Error::Storage(format!(
                                "device index points at missing cabinet {}",
                                cabinet_id
                            )))
                        }
                    };
                    Provisioned::Existing(existing)
                }
                None => {
                    index.insert(
                        (cabinet.user_id.as_str(), device_id.as_str()),
                        cabinet.id.as_str(),
                    )?;
                    let json = serde_json::to_string(&cabinet)?;
                    table.insert(
                        (cabinet.user_id.as_str(), cabinet.id.as_str()),
                        json.as_str(),
                    )?;
                    Provisioned::Created(cabinet)
                }
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Load a cabinet by id.
    pub fn get(&self, user_id: &str, cabinet_id: &str) -> Result<Option<Cabinet>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CABINETS_TABLE)?;
        match table.get((user_id, cabinet_id))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load a cabinet by device identifier.
    pub fn find_by_device(&self, user_id: &str, device_id: &str) -> Result<Option<Cabinet>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(DEVICE_INDEX)?;
        let cabinet_id = match index.get((user_id, device_id))? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(CABINETS_TABLE)?;
        match table.get((user_id, cabinet_id.as_str()))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// List a user's cabinets, oldest first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Cabinet>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CABINETS_TABLE)?;
        let mut cabinets = Vec::new();
        for result in table.range((user_id, "")..(user_id, "\u{10ffff}"))? {
            let (_key, value) = result?;
            if let Ok(cabinet) = serde_json::from_str::<Cabinet>(value.value()) {
                cabinets.push(cabinet);
            }
        }
        cabinets.sort_by_key(|c| c.created_at);
        Ok(cabinets)
    }

    /// Number of cabinets a user owns.
    pub fn count_for_user(&self, user_id: &str) -> Result<usize> {
        Ok(self.list_for_user(user_id)?.len())
    }

    /// Rewrite a cabinet row, moving the device index when the device id
    /// changed.
    pub fn update(&self, cabinet: &Cabinet) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CABINETS_TABLE)?;
            let previous: Cabinet = match table.get((cabinet.user_id.as_str(), cabinet.id.as_str()))? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Err(Error::NotFound(format!("cabinet {}", cabinet.id))),
            };

            if previous.device_id != cabinet.device_id {
                let mut index = write_txn.open_table(DEVICE_INDEX)?;
                if let Some(old) = &previous.device_id {
                    index.remove((cabinet.user_id.as_str(), old.as_str()))?;
                }
                if let Some(new) = &cabinet.device_id {
                    if index.get((cabinet.user_id.as_str(), new.as_str()))?.is_some() {
                        return Err(Error::Conflict("device_id".to_string()));
                    }
                    index.insert((cabinet.user_id.as_str(), new.as_str()), cabinet.id.as_str())?;
                }
            }

            let json = serde_json::to_string(cabinet)?;
            table.insert(
                (cabinet.user_id.as_str(), cabinet.id.as_str()),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete a cabinet row and its device index entry. Dependent rows
    /// are removed by `Stores::delete_cabinet`.
    pub fn delete(&self, user_id: &str, cabinet_id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CABINETS_TABLE)?;
            let previous: Option<Cabinet> = match table.remove((user_id, cabinet_id))? {
                Some(value) => Some(serde_json::from_str(value.value())?),
                None => None,
            };
            match previous {
                Some(cabinet) => {
                    if let Some(device_id) = &cabinet.device_id {
                        let mut index = write_txn.open_table(DEVICE_INDEX)?;
                        index.remove((user_id, device_id.as_str()))?;
                    }
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
