//! Feed router.
//!
//! Turns an inbound topic + JSON payload into zero or more typed events,
//! resolves the owning cabinet, and hands jobs to the ingestion queues.
//! Every rejection is a log line, never an error back to the broker: a
//! device cannot do anything useful with a failure response, and one bad
//! payload must not take the session down.

use std::sync::Arc;

use cabio_core::time::{now_millis, parse_device_time};
use cabio_storage::{BoardKind, SensorKind};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::feed::Feed;
use crate::queues::{BoardJob, IngestionQueues, NetworkJob, RelayJob, SensorJob, SensorValue};
use crate::resolve::CabinetResolver;

/// Mode discriminator on the history feed carrying a combined
/// temperature/humidity sample.
const MODE_TEMP_HUMI: &str = "Temp_Humi";
/// Mode discriminator on the history feed carrying a location sample.
const MODE_LOCATION: &str = "location";

/// Fields a device may put in a feed payload. Everything is optional at
/// the wire level; the router enforces per-feed requirements itself so
/// it can log precisely what was missing.
#[derive(Debug, Deserialize)]
struct FeedPayload {
    email: Option<String>,
    device_id: Option<String>,
    data: Option<Value>,
    mode: Option<String>,
    time: Option<String>,
}

/// A routed, validated event.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    /// Device registration: provision a cabinet if none exists.
    Provision { email: String, device_id: String },
    /// A telemetry event for an already-provisioned cabinet.
    Ingest {
        email: String,
        device_id: String,
        kind: IngestKind,
        timestamp: i64,
    },
}

/// Typed payload of an ingest event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestKind {
    Temperature(f64),
    Humidity(f64),
    /// Raw `X-Y` string, split by the sensor queue consumer.
    Location(String),
    /// Raw `id-STATE` string, parsed by the relay queue consumer.
    Relay(String),
    Ip(String),
    Firmware { board: BoardKind, version: String },
}

/// Parse and validate one message. Returns the events to process; an
/// empty vec means the message was dropped (already logged).
pub fn route(topic: &str, payload: &[u8]) -> Vec<RoutedEvent> {
    let feed = match Feed::from_topic(topic) {
        Some(feed) => feed,
        None => {
            debug!(topic, "message on unrouted topic");
            return Vec::new();
        }
    };

    let parsed: FeedPayload = match serde_json::from_slice(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!(topic, error = %e, "malformed feed payload, dropping");
            return Vec::new();
        }
    };

    let email = match parsed.email {
        Some(ref email) if !email.is_empty() => email.clone(),
        _ => {
            warn!(%feed, "payload missing email, dropping");
            return Vec::new();
        }
    };
    let device_id = match parsed.device_id {
        Some(ref id) if !id.is_empty() => id.clone(),
        _ => {
            warn!(%feed, "payload missing device_id, dropping");
            return Vec::new();
        }
    };

    // Registration is its own path: no data required, no further routing.
    if feed == Feed::DeviceId {
        return vec![RoutedEvent::Provision { email, device_id }];
    }

    // Relay, ip and firmware carry their payload in other fields; every
    // other feed must have data.
    let requires_data = !matches!(feed, Feed::Relay | Feed::Ip | Feed::Firmware);
    if requires_data && parsed.data.is_none() {
        warn!(%feed, "payload missing data, dropping");
        return Vec::new();
    }

    match feed {
        Feed::Temperature | Feed::Humidity => {
            let value = match parsed.data.as_ref().and_then(value_as_f64) {
                Some(value) => value,
                None => {
                    warn!(%feed, data = ?parsed.data, "non-numeric sensor data, dropping");
                    return Vec::new();
                }
            };
            let kind = if feed == Feed::Temperature {
                IngestKind::Temperature(value)
            } else {
                IngestKind::Humidity(value)
            };
            vec![RoutedEvent::Ingest {
                email,
                device_id,
                kind,
                timestamp: now_millis(),
            }]
        }
        Feed::Location => {
            let data = value_as_string(parsed.data.as_ref());
            vec![RoutedEvent::Ingest {
                email,
                device_id,
                kind: IngestKind::Location(data),
                timestamp: now_millis(),
            }]
        }
        Feed::Relay => {
            let data = value_as_string(parsed.data.as_ref());
            vec![RoutedEvent::Ingest {
                email,
                device_id,
                kind: IngestKind::Relay(data),
                timestamp: now_millis(),
            }]
        }
        Feed::Ip => {
            let data = value_as_string(parsed.data.as_ref());
            vec![RoutedEvent::Ingest {
                email,
                device_id,
                kind: IngestKind::Ip(data),
                timestamp: now_millis(),
            }]
        }
        Feed::Firmware => {
            // Firmware reports invert the fields: mode carries the
            // version string, data carries the board name.
            let version = match parsed.mode {
                Some(ref version) if !version.is_empty() => version.clone(),
                _ => {
                    warn!("firmware report missing version, dropping");
                    return Vec::new();
                }
            };
            let board_name = value_as_string(parsed.data.as_ref());
            let board = match BoardKind::parse(&board_name) {
                Some(board) => board,
                None => {
                    warn!(board = %board_name, "unknown board on firmware feed, dropping");
                    return Vec::new();
                }
            };
            vec![RoutedEvent::Ingest {
                email,
                device_id,
                kind: IngestKind::Firmware { board, version },
                timestamp: now_millis(),
            }]
        }
        Feed::History => route_history(email, device_id, &parsed),
        Feed::DeviceId => unreachable!("registration handled above"),
    }
}

/// History feed: a device flushing its offline buffer. The payload's own
/// clock is used when it parses; `mode` picks the sample shape.
fn route_history(email: String, device_id: String, parsed: &FeedPayload) -> Vec<RoutedEvent> {
    let mode = match parsed.mode {
        Some(ref mode) if !mode.is_empty() => mode.as_str(),
        _ => {
            warn!("history payload missing mode, dropping");
            return Vec::new();
        }
    };

    let timestamp = match parsed.time.as_deref() {
        Some(time) => match parse_device_time(time) {
            Some(ts) => ts,
            None => {
                warn!(time, "unparseable history timestamp, using server time");
                now_millis()
            }
        },
        None => now_millis(),
    };

    let data = value_as_string(parsed.data.as_ref());

    match mode {
        MODE_TEMP_HUMI => {
            let (temperature, humidity) = match split_temp_humi(&data) {
                Some(pair) => pair,
                None => {
                    error!(data = %data, "invalid temperature/humidity history sample, dropping");
                    return Vec::new();
                }
            };
            // Zero is the device's "no reading" sentinel, not a sample.
            if temperature == 0.0 || humidity == 0.0 {
                error!(data = %data, "zero temperature or humidity in history sample, dropping");
                return Vec::new();
            }
            vec![
                RoutedEvent::Ingest {
                    email: email.clone(),
                    device_id: device_id.clone(),
                    kind: IngestKind::Temperature(temperature),
                    timestamp,
                },
                RoutedEvent::Ingest {
                    email,
                    device_id,
                    kind: IngestKind::Humidity(humidity),
                    timestamp,
                },
            ]
        }
        MODE_LOCATION => vec![RoutedEvent::Ingest {
            email,
            device_id,
            kind: IngestKind::Location(data),
            timestamp,
        }],
        other => {
            warn!(mode = other, "unknown history mode, dropping");
            Vec::new()
        }
    }
}

fn split_temp_humi(data: &str) -> Option<(f64, f64)> {
    let (temperature, humidity) = data.split_once('-')?;
    Some((
        temperature.trim().parse().ok()?,
        humidity.trim().parse().ok()?,
    ))
}

/// Devices send numbers both as JSON numbers and as strings.
fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// The router with its collaborators: resolves cabinets and enqueues
/// ingestion jobs for every event produced by [`route`].
pub struct FeedRouter {
    resolver: CabinetResolver,
    queues: IngestionQueues,
}

impl FeedRouter {
    pub fn new(resolver: CabinetResolver, queues: IngestionQueues) -> Self {
        Self { resolver, queues }
    }

    /// Handle one inbound broker message.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        for event in route(topic, payload) {
            match event {
                RoutedEvent::Provision { email, device_id } => {
                    if let Err(e) = self.resolver.provision(&email, &device_id) {
                        error!(email, device_id, error = %e, "cabinet provisioning failed");
                    }
                }
                RoutedEvent::Ingest {
                    email,
                    device_id,
                    kind,
                    timestamp,
                } => self.ingest(&email, &device_id, kind, timestamp),
            }
        }
    }

    /// Resolve the cabinet once per event, then enqueue.
    fn ingest(&self, email: &str, device_id: &str, kind: IngestKind, timestamp: i64) {
        let (user, cabinet) = match self.resolver.resolve(email, device_id) {
            Ok(Some(found)) => found,
            Ok(None) => {
                warn!(email, device_id, "no cabinet for device event, dropping");
                return;
            }
            Err(e) => {
                error!(email, device_id, error = %e, "cabinet resolution failed");
                return;
            }
        };

        match kind {
            IngestKind::Temperature(value) => self.queues.enqueue_sensor(SensorJob {
                user_id: user.id,
                cabinet_id: cabinet.id,
                kind: SensorKind::Temperature,
                value: SensorValue::Scalar(value),
                timestamp,
            }),
            IngestKind::Humidity(value) => self.queues.enqueue_sensor(SensorJob {
                user_id: user.id,
                cabinet_id: cabinet.id,
                kind: SensorKind::Humidity,
                value: SensorValue::Scalar(value),
                timestamp,
            }),
            IngestKind::Location(data) => self.queues.enqueue_sensor(SensorJob {
                user_id: user.id,
                cabinet_id: cabinet.id,
                kind: SensorKind::Location,
                value: SensorValue::Raw(data),
                timestamp,
            }),
            IngestKind::Relay(data) => self.queues.enqueue_relay(RelayJob {
                user_id: user.id,
                cabinet_id: cabinet.id,
                data,
                timestamp,
            }),
            IngestKind::Ip(ip) => self.queues.enqueue_network(NetworkJob {
                user_id: user.id,
                cabinet_id: cabinet.id,
                ip,
                timestamp,
            }),
            IngestKind::Firmware { board, version } => self.queues.enqueue_board(BoardJob {
                user_id: user.id,
                cabinet_id: cabinet.id,
                board,
                version,
                timestamp,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(feed: &str) -> String {
        format!("aio_user/feeds/{}", feed)
    }

    #[test]
    fn test_missing_email_drops() {
        let payload = br#"{"device_id": "dev-1", "data": "23.5"}"#;
        assert!(route(&topic("temperature"), payload).is_empty());
    }

    #[test]
    fn test_missing_device_id_drops() {
        let payload = br#"{"email": "a@example.com", "data": "23.5"}"#;
        assert!(route(&topic("temperature"), payload).is_empty());
    }

    #[test]
    fn test_malformed_json_drops() {
        assert!(route(&topic("temperature"), b"not json").is_empty());
    }

    #[test]
    fn test_registration_requires_both_fields() {
        let payload = br#"{"email": "a@example.com"}"#;
        assert!(route(&topic("device_id"), payload).is_empty());

        let payload = br#"{"email": "a@example.com", "device_id": "dev-1"}"#;
        let events = route(&topic("device_id"), payload);
        assert_eq!(
            events,
            vec![RoutedEvent::Provision {
                email: "a@example.com".to_string(),
                device_id: "dev-1".to_string(),
            }]
        );
    }

    #[test]
    fn test_temperature_accepts_string_and_number() {
        for payload in [
            br#"{"email": "a@x.com", "device_id": "d", "data": "23.5"}"#.as_slice(),
            br#"{"email": "a@x.com", "device_id": "d", "data": 23.5}"#.as_slice(),
        ] {
            let events = route(&topic("temperature"), payload);
            assert_eq!(events.len(), 1);
            match &events[0] {
                RoutedEvent::Ingest { kind, .. } => {
                    assert_eq!(*kind, IngestKind::Temperature(23.5))
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_non_numeric_temperature_rejected() {
        let payload = br#"{"email": "a@x.com", "device_id": "d", "data": "warm"}"#;
        assert!(route(&topic("temperature"), payload).is_empty());
    }

    #[test]
    fn test_sensor_feed_requires_data() {
        let payload = br#"{"email": "a@x.com", "device_id": "d"}"#;
        assert!(route(&topic("humidity"), payload).is_empty());
        // Relay, ip and firmware are exempt from the data requirement
        // (firmware still fails later on its own field checks).
        let events = route(&topic("relay"), payload);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_history_temp_humi_splits_into_two() {
        let payload = br#"{"email": "a@x.com", "device_id": "d", "mode": "Temp_Humi",
                           "data": "23.5-45.2", "time": "14:30:05 02/01/2025"}"#;
        let events = route(&topic("history"), payload);
        assert_eq!(events.len(), 2);

        let (first_kind, first_ts) = match &events[0] {
            RoutedEvent::Ingest {
                kind, timestamp, ..
            } => (kind.clone(), *timestamp),
            other => panic!("unexpected event {:?}", other),
        };
        let (second_kind, second_ts) = match &events[1] {
            RoutedEvent::Ingest {
                kind, timestamp, ..
            } => (kind.clone(), *timestamp),
            other => panic!("unexpected event {:?}", other),
        };

        assert_eq!(first_kind, IngestKind::Temperature(23.5));
        assert_eq!(second_kind, IngestKind::Humidity(45.2));
        // Both samples carry the device-reported timestamp.
        assert_eq!(first_ts, second_ts);
        assert_eq!(
            first_ts,
            cabio_core::time::parse_device_time("14:30:05 02/01/2025").unwrap()
        );
    }

    #[test]
    fn test_history_zero_sentinel_rejected() {
        for data in ["0-45.2", "23.5-0", "0-0"] {
            let payload = format!(
                r#"{{"email": "a@x.com", "device_id": "d", "mode": "Temp_Humi", "data": "{}"}}"#,
                data
            );
            assert!(
                route(&topic("history"), payload.as_bytes()).is_empty(),
                "data {} must be rejected",
                data
            );
        }
    }

    #[test]
    fn test_history_non_numeric_rejected() {
        let payload =
            br#"{"email": "a@x.com", "device_id": "d", "mode": "Temp_Humi", "data": "a-b"}"#;
        assert!(route(&topic("history"), payload).is_empty());
    }

    #[test]
    fn test_history_location_passes_raw() {
        let payload = br#"{"email": "a@x.com", "device_id": "d", "mode": "location",
                           "data": "10.77-106.69"}"#;
        let events = route(&topic("history"), payload);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RoutedEvent::Ingest { kind, .. } => {
                assert_eq!(*kind, IngestKind::Location("10.77-106.69".to_string()))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_history_without_mode_drops() {
        let payload = br#"{"email": "a@x.com", "device_id": "d", "data": "23.5-45.2"}"#;
        assert!(route(&topic("history"), payload).is_empty());
    }

    #[test]
    fn test_firmware_fields() {
        let payload = br#"{"email": "a@x.com", "device_id": "d", "mode": "2.1.0",
                           "data": "Relay 6ch"}"#;
        let events = route(&topic("firmware"), payload);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RoutedEvent::Ingest { kind, .. } => assert_eq!(
                *kind,
                IngestKind::Firmware {
                    board: BoardKind::Relay6ch,
                    version: "2.1.0".to_string(),
                }
            ),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_firmware_unknown_board_rejected() {
        let payload = br#"{"email": "a@x.com", "device_id": "d", "mode": "2.1.0",
                           "data": "esp32"}"#;
        assert!(route(&topic("firmware"), payload).is_empty());
    }

    #[test]
    fn test_unknown_feed_not_routed() {
        let payload = br#"{"email": "a@x.com", "device_id": "d", "data": "1"}"#;
        assert!(route("aio_user/feeds/relay_home", payload).is_empty());
    }
}
