//! Persistent stores for the Cabio cabinet backend.
//!
//! Every entity family gets its own redb database file with JSON rows and
//! composite tuple keys; uniqueness constraints are index tables written
//! in the same transaction as the row. The [`Stores`] aggregate opens the
//! whole set under one data directory and owns cascade deletion, which
//! spans files.

use std::path::Path;
use std::sync::Arc;

use redb::Database;

pub mod boards;
pub mod cabinets;
pub mod error;
pub mod logs;
pub mod network;
pub mod relays;
pub mod schedules;
pub mod sensors;
pub mod users;

pub use boards::{BoardFirmware, BoardStore};
pub use cabinets::{BoardKind, Cabinet, CabinetStore, Provisioned};
pub use error::{Error, Result};
pub use logs::{ActivityEntry, LogStore};
pub use network::{NetworkInfo, NetworkStore};
pub use relays::{Relay, RelayStore, RELAY_CAP, RELAY_HOME_CAP};
pub use schedules::{Schedule, ScheduleAction, ScheduleStore, Weekday};
pub use sensors::{LocationReading, ScalarReading, SensorKind, SensorStore};
pub use users::{Role, User, UserStore};

/// Open or create a redb database file, creating parent directories.
pub(crate) fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = if path.exists() {
        Database::open(path)?
    } else {
        Database::create(path)?
    };
    Ok(db)
}

/// The full store set, opened under one data directory.
pub struct Stores {
    pub users: UserStore,
    pub cabinets: CabinetStore,
    pub relays: RelayStore,
    pub schedules: ScheduleStore,
    pub sensors: SensorStore,
    pub boards: BoardStore,
    pub network: NetworkStore,
    pub logs: LogStore,
}

impl Stores {
    /// Open every store under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Arc<Self>> {
        let dir = dir.as_ref();
        Ok(Arc::new(Self {
            users: UserStore::open(dir.join("users.redb"))?,
            cabinets: CabinetStore::open(dir.join("cabinets.redb"))?,
            relays: RelayStore::open(dir.join("relays.redb"))?,
            schedules: ScheduleStore::open(dir.join("schedules.redb"))?,
            sensors: SensorStore::open(dir.join("sensors.redb"))?,
            boards: BoardStore::open(dir.join("boards.redb"))?,
            network: NetworkStore::open(dir.join("network.redb"))?,
            logs: LogStore::open(dir.join("logs.redb"))?,
        }))
    }

    /// Delete a cabinet and everything it owns: relays, schedules, sensor
    /// series, board rows, network info and activity logs.
    pub fn delete_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<bool> {
        if !self.cabinets.delete(user_id, cabinet_id)? {
            return Ok(false);
        }
        self.relays.delete_for_cabinet(user_id, cabinet_id)?;
        self.schedules.delete_for_cabinet(user_id, cabinet_id)?;
        self.sensors.delete_for_cabinet(user_id, cabinet_id)?;
        self.boards.delete_for_cabinet(user_id, cabinet_id)?;
        self.network.delete_for_cabinet(user_id, cabinet_id)?;
        self.logs.delete_for_cabinet(user_id, cabinet_id)?;
        Ok(true)
    }

    /// Delete a user and cascade through every cabinet they own.
    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        for cabinet in self.cabinets.list_for_user(user_id)? {
            self.delete_cabinet(user_id, &cabinet.id)?;
        }
        self.users.delete(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabio_core::time::now_millis;
    use tempfile::TempDir;

    fn seed(stores: &Stores) {
        let now = now_millis();
        stores
            .users
            .create(&User {
                id: "u1".to_string(),
                username: "alice".to_string(),
                fullname: "Alice".to_string(),
                email: "a@example.com".to_string(),
                password_hash: "hash".to_string(),
                role: Role::User,
                broker_username: Some("aio".to_string()),
                broker_key: Some("key".to_string()),
                phone_number: None,
                refresh_token: None,
                created_at: now,
            })
            .unwrap();
        stores
            .cabinets
            .create(&Cabinet {
                id: "c1".to_string(),
                user_id: "u1".to_string(),
                name: "Cabinet 1".to_string(),
                description: String::new(),
                board: BoardKind::Relay6ch,
                device_id: Some("dev-1".to_string()),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        stores
            .relays
            .add(
                &Relay {
                    user_id: "u1".to_string(),
                    cabinet_id: "c1".to_string(),
                    relay_id: 1,
                    relay_name: "Relay 1".to_string(),
                    state: false,
                    relay_home: false,
                },
                None,
            )
            .unwrap();
        stores
            .sensors
            .append_scalar(SensorKind::Temperature, "u1", "c1", 25.0, now)
            .unwrap();
        stores
            .boards
            .upsert("u1", "c1", BoardKind::Relay6ch, "1.0.0", now)
            .unwrap();
        stores.logs.append("u1", "c1", "Relay 1 added", now).unwrap();
        stores.network.upsert("u1", "c1", "10.0.0.2", now).unwrap();
    }

    #[test]
    fn test_cascade_delete_cabinet() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        seed(&stores);

        assert!(stores.delete_cabinet("u1", "c1").unwrap());

        assert!(stores.cabinets.get("u1", "c1").unwrap().is_none());
        assert!(stores.relays.list("u1", "c1").unwrap().is_empty());
        assert_eq!(
            stores
                .sensors
                .count_scalars(SensorKind::Temperature, "u1", "c1")
                .unwrap(),
            0
        );
        assert!(stores.boards.list_for_cabinet("u1", "c1").unwrap().is_empty());
        assert!(stores.network.get("u1", "c1").unwrap().is_none());
        assert_eq!(stores.logs.count("u1", "c1").unwrap(), 0);
        // The device id is free for reuse.
        assert!(stores.cabinets.find_by_device("u1", "dev-1").unwrap().is_none());
    }

    #[test]
    fn test_cascade_delete_user() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        seed(&stores);

        assert!(stores.delete_user("u1").unwrap());
        assert!(stores.users.get("u1").unwrap().is_none());
        assert!(stores.cabinets.list_for_user("u1").unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_cabinet_is_false() {
        let dir = TempDir::new().unwrap();
        let stores = Stores::open(dir.path()).unwrap();
        assert!(!stores.delete_cabinet("u1", "nope").unwrap());
    }
}
