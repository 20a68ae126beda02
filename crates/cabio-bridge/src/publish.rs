//! Outbound command payloads.
//!
//! Commands are built as typed values and serialized to the exact JSON
//! shapes the cabinet firmware parses. String booleans and `ON`/`OFF`
//! states are part of that wire contract.

use cabio_storage::{Schedule, ScheduleAction, Weekday};
use serde::Serialize;

/// Command mode discriminator.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum CommandMode {
    Schedule,
    Manual,
}

/// A command ready to publish on a feed.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandPayload {
    /// Remove a schedule from the device.
    ScheduleDelete {
        email: String,
        device_id: String,
        mode: CommandMode,
        id: String,
        /// Wire contract: the delete marker is the string "true".
        delete: String,
    },
    /// Create or update a schedule on the device.
    ScheduleUpsert {
        email: String,
        device_id: String,
        mode: CommandMode,
        id: String,
        /// "true" when the schedule is enabled.
        state: String,
        days: Vec<Weekday>,
        time: String,
        actions: Vec<ScheduleAction>,
    },
    /// Set one relay by hand.
    Manual {
        email: String,
        device_id: String,
        mode: CommandMode,
        index: u32,
        /// "ON" or "OFF".
        state: String,
    },
}

impl CommandPayload {
    /// Build a schedule deletion command.
    pub fn schedule_delete(email: &str, device_id: &str, schedule_id: &str) -> Self {
        CommandPayload::ScheduleDelete {
            email: email.to_string(),
            device_id: device_id.to_string(),
            mode: CommandMode::Schedule,
            id: schedule_id.to_string(),
            delete: "true".to_string(),
        }
    }

    /// Build a schedule upsert command from a stored schedule.
    pub fn schedule_upsert(email: &str, device_id: &str, schedule: &Schedule) -> Self {
        CommandPayload::ScheduleUpsert {
            email: email.to_string(),
            device_id: device_id.to_string(),
            mode: CommandMode::Schedule,
            id: schedule.id.clone(),
            state: if schedule.enabled { "true" } else { "false" }.to_string(),
            days: schedule.days.clone(),
            time: schedule.time.clone(),
            actions: schedule.actions.clone(),
        }
    }

    /// Build a manual relay command.
    pub fn manual(email: &str, device_id: &str, relay_id: u32, state: bool) -> Self {
        CommandPayload::Manual {
            email: email.to_string(),
            device_id: device_id.to_string(),
            mode: CommandMode::Manual,
            index: relay_id,
            state: if state { "ON" } else { "OFF" }.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manual_payload_shape() {
        let payload = CommandPayload::manual("a@example.com", "dev-1", 2, true);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "email": "a@example.com",
                "device_id": "dev-1",
                "mode": "Manual",
                "index": 2,
                "state": "ON",
            })
        );
    }

    #[test]
    fn test_manual_off_state() {
        let payload = CommandPayload::manual("a@example.com", "dev-1", 4, false);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["state"], "OFF");
    }

    #[test]
    fn test_schedule_delete_shape() {
        let payload = CommandPayload::schedule_delete("a@example.com", "dev-1", "s-9");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "email": "a@example.com",
                "device_id": "dev-1",
                "mode": "Schedule",
                "id": "s-9",
                "delete": "true",
            })
        );
    }

    #[test]
    fn test_schedule_upsert_shape() {
        let schedule = Schedule {
            id: "s-1".to_string(),
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            days: vec![Weekday::Monday, Weekday::Friday],
            time: "06:30".to_string(),
            enabled: true,
            actions: vec![ScheduleAction {
                relay_id: 1,
                state: true,
            }],
        };
        let payload = CommandPayload::schedule_upsert("a@example.com", "dev-1", &schedule);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["mode"], "Schedule");
        assert_eq!(value["state"], "true");
        assert_eq!(value["days"], json!(["Monday", "Friday"]));
        assert_eq!(value["time"], "06:30");
        assert_eq!(value["actions"][0]["relay_id"], 1);
        // Internal ownership fields never leak onto the wire.
        assert!(value.get("user_id").is_none());
        assert!(value.get("cabinet_id").is_none());
    }
}
