//! Relay channels of a cabinet.
//!
//! Keys are `(user_id, cabinet_id, relay_id)`, so listings come back
//! ordered by relay number for free.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{open_database, Error, Result};

// Relays table: key = (user_id, cabinet_id, relay_id), value = Relay (JSON)
const RELAYS_TABLE: TableDefinition<(&str, &str, u32), &str> = TableDefinition::new("relays");

/// Maximum relays with `relay_home` enabled per cabinet.
pub const RELAY_HOME_CAP: usize = 6;

/// Maximum relays per cabinet for non-admin accounts.
pub const RELAY_CAP: usize = 6;

/// A switchable output channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    pub user_id: String,
    pub cabinet_id: String,
    pub relay_id: u32,
    pub relay_name: String,
    #[serde(default)]
    pub state: bool,
    /// Surfaced on the dashboard home page.
    #[serde(default)]
    pub relay_home: bool,
}

/// Relay store backed by redb.
pub struct RelayStore {
    db: Arc<Database>,
}

impl RelayStore {
    /// Open or create the relay store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RELAYS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Add a relay. `cap` bounds the total relays per cabinet (None for
    /// privileged accounts). Duplicate relay numbers are rejected.
    pub fn add(&self, relay: &Relay, cap: Option<usize>) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RELAYS_TABLE)?;

            if table
                .get((
                    relay.user_id.as_str(),
                    relay.cabinet_id.as_str(),
                    relay.relay_id,
                ))?
                .is_some()
            {
                return Err(Error::Conflict(format!("relay {}", relay.relay_id)));
            }

            if let Some(cap) = cap {
                let count = table
                    .range(
                        (relay.user_id.as_str(), relay.cabinet_id.as_str(), 0u32)
                            ..=(relay.user_id.as_str(), relay.cabinet_id.as_str(), u32::MAX),
                    )?
                    .count();
                if count >= cap {
                    return Err(Error::LimitExceeded(format!(
                        "at most {} relays per cabinet",
                        cap
                    )));
                }
            }

            let json = serde_json::to_string(relay)?;
            table.insert(
                (
                    relay.user_id.as_str(),
                    relay.cabinet_id.as_str(),
                    relay.relay_id,
                ),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load one relay.
    pub fn get(&self, user_id: &str, cabinet_id: &str, relay_id: u32) -> Result<Option<Relay>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RELAYS_TABLE)?;
        match table.get((user_id, cabinet_id, relay_id))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// List a cabinet's relays ordered by relay number.
    pub fn list(&self, user_id: &str, cabinet_id: &str) -> Result<Vec<Relay>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RELAYS_TABLE)?;
        let mut relays = Vec::new();
        for result in table.range((user_id, cabinet_id, 0u32)..=(user_id, cabinet_id, u32::MAX))? {
            let (_key, value) = result?;
            if let Ok(relay) = serde_json::from_str::<Relay>(value.value()) {
                relays.push(relay);
            }
        }
        Ok(relays)
    }

    /// List the relays surfaced on the home page.
    pub fn list_home(&self, user_id: &str, cabinet_id: &str) -> Result<Vec<Relay>> {
        Ok(self
            .list(user_id, cabinet_id)?
            .into_iter()
            .filter(|r| r.relay_home)
            .collect())
    }

    /// Set a relay's on/off state. Returns the updated relay, or `None`
    /// when the relay does not exist (ingestion drops those events).
    pub fn set_state(
        &self,
        user_id: &str,
        cabinet_id: &str,
        relay_id: u32,
        state: bool,
    ) -> Result<Option<Relay>> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(RELAYS_TABLE)?;
            let mut relay: Relay = match table.get((user_id, cabinet_id, relay_id))? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Ok(None),
            };
            relay.state = state;
            let json = serde_json::to_string(&relay)?;
            table.insert((user_id, cabinet_id, relay_id), json.as_str())?;
            relay
        };
        write_txn.commit()?;
        Ok(Some(updated))
    }

    /// Toggle home-page visibility, enforcing the cap of
    /// [`RELAY_HOME_CAP`] visible relays per cabinet. The check and the
    /// write share one transaction so the cap cannot be raced past.
    pub fn set_home(
        &self,
        user_id: &str,
        cabinet_id: &str,
        relay_id: u32,
        relay_home: bool,
    ) -> Result<Relay> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(RELAYS_TABLE)?;
            let mut relay: Relay = match table.get((user_id, cabinet_id, relay_id))? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Err(Error::NotFound(format!("relay {}", relay_id))),
            };

            if relay_home && !relay.relay_home {
                let mut home_count = 0usize;
                for result in
                    table.range((user_id, cabinet_id, 0u32)..=(user_id, cabinet_id, u32::MAX))?
                {
                    let (_key, value) = result?;
                    if let Ok(other) = serde_json::from_str::<Relay>(value.value()) {
                        if other.relay_home {
                            home_count += 1;
                        }
                    }
                }
                if home_count >= RELAY_HOME_CAP {
                    return Err(Error::LimitExceeded(format!(
                        "at most {} relays on the home page",
                        RELAY_HOME_CAP
                    )));
                }
            }

            relay.relay_home = relay_home;
            let json = serde_json::to_string(&relay)?;
            table.insert((user_id, cabinet_id, relay_id), json.as_str())?;
            relay
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Rename and/or renumber a relay. Renumbering moves the row to the
    /// new key and fails when the target number is taken.
    pub fn update(
        &self,
        user_id: &str,
        cabinet_id: &str,
        relay_id: u32,
        new_relay_id: Option<u32>,
        new_name: Option<String>,
    ) -> Result<Relay> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(RELAYS_TABLE)?;
            let mut relay: Relay = match table.get((user_id, cabinet_id, relay_id))? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Err(Error::NotFound(format!("relay {}", relay_id))),
            };

            if let Some(target) = new_relay_id {
                if target != relay_id {
                    if table.get((user_id, cabinet_id, target))?.is_some() {
                        return Err(Error::Conflict(format!("relay {}", target)));
                    }
                    table.remove((user_id, cabinet_id, relay_id))?;
                    relay.relay_id = target;
                }
            }
            if let Some(name) = new_name {
                relay.relay_name = name;
            }

            let json = serde_json::to_string(&relay)?;
            table.insert((user_id, cabinet_id, relay.relay_id), json.as_str())?;
            relay
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Delete one relay.
    pub fn delete(&self, user_id: &str, cabinet_id: &str, relay_id: u32) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(RELAYS_TABLE)?;
            let existed = table.remove((user_id, cabinet_id, relay_id))?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Remove every relay of a cabinet (cascade path).
    pub fn delete_for_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<usize> {
        let keys: Vec<u32> = self
            .list(user_id, cabinet_id)?
            .into_iter()
            .map(|r| r.relay_id)
            .collect();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RELAYS_TABLE)?;
            for relay_id in &keys {
                table.remove((user_id, cabinet_id, *relay_id))?;
            }
        }
        write_txn.commit()?;
        Ok(keys.len())
    }
}
