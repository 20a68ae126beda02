//! Recurring relay schedules.

use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{open_database, Error, Result};

// Schedules table: key = (user_id, cabinet_id, schedule_id), value = Schedule (JSON)
const SCHEDULES_TABLE: TableDefinition<(&str, &str, &str), &str> =
    TableDefinition::new("schedules");

/// Day of the week, serialized with the names devices expect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    /// Today's weekday (UTC).
    pub fn today() -> Self {
        match Utc::now().weekday() {
            chrono::Weekday::Sun => Weekday::Sunday,
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
        }
    }
}

/// One relay action fired when a schedule triggers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleAction {
    pub relay_id: u32,
    pub state: bool,
}

/// A recurring action set: on the listed days, at `time` (HH:MM), apply
/// the actions when enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub user_id: String,
    pub cabinet_id: String,
    pub days: Vec<Weekday>,
    /// Time of day, `HH:MM`.
    pub time: String,
    #[serde(default)]
    pub enabled: bool,
    pub actions: Vec<ScheduleAction>,
}

/// Schedule store backed by redb.
pub struct ScheduleStore {
    db: Arc<Database>,
}

impl ScheduleStore {
    /// Open or create the schedule store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = open_database(path.as_ref())?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SCHEDULES_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Insert or replace a schedule.
    pub fn save(&self, schedule: &Schedule) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SCHEDULES_TABLE)?;
            let json = serde_json::to_string(schedule)?;
            table.insert(
                (
                    schedule.user_id.as_str(),
                    schedule.cabinet_id.as_str(),
                    schedule.id.as_str(),
                ),
                json.as_str(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load one schedule.
    pub fn get(
        &self,
        user_id: &str,
        cabinet_id: &str,
        schedule_id: &str,
    ) -> Result<Option<Schedule>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCHEDULES_TABLE)?;
        match table.get((user_id, cabinet_id, schedule_id))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// List a cabinet's schedules.
    pub fn list(&self, user_id: &str, cabinet_id: &str) -> Result<Vec<Schedule>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCHEDULES_TABLE)?;
        let mut schedules = Vec::new();
        for result in
            table.range((user_id, cabinet_id, "")..=(user_id, cabinet_id, "\u{10ffff}"))?
        {
            let (_key, value) = result?;
            if let Ok(schedule) = serde_json::from_str::<Schedule>(value.value()) {
                schedules.push(schedule);
            }
        }
        Ok(schedules)
    }

    /// List schedules that fire on the given day.
    pub fn list_for_day(
        &self,
        user_id: &str,
        cabinet_id: &str,
        day: Weekday,
    ) -> Result<Vec<Schedule>> {
        Ok(self
            .list(user_id, cabinet_id)?
            .into_iter()
            .filter(|s| s.days.contains(&day))
            .collect())
    }

    /// Flip a schedule's enabled flag. Returns the updated schedule.
    pub fn set_enabled(
        &self,
        user_id: &str,
        cabinet_id: &str,
        schedule_id: &str,
        enabled: bool,
    ) -> Result<Schedule> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(SCHEDULES_TABLE)?;
            let mut schedule: Schedule = match table.get((user_id, cabinet_id, schedule_id))? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Err(Error::NotFound(format!("schedule {}", schedule_id))),
            };
            schedule.enabled = enabled;
            let json = serde_json::to_string(&schedule)?;
            table.insert((user_id, cabinet_id, schedule_id), json.as_str())?;
            schedule
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Delete one schedule.
    pub fn delete(&self, user_id: &str, cabinet_id: &str, schedule_id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SCHEDULES_TABLE)?;
            let existed = table.remove((user_id, cabinet_id, schedule_id))?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Remove every schedule of a cabinet (cascade path).
    pub fn delete_for_cabinet(&self, user_id: &str, cabinet_id: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .list(user_id, cabinet_id)?
            .into_iter()
            .map(|s| s.id)
            .collect();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SCHEDULES_TABLE)?;
            for id in &ids {
                table.remove((user_id, cabinet_id, id.as_str()))?;
            }
        }
        write_txn.commit()?;
        Ok(ids.len())
    }
}
