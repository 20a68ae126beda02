//! Ingestion queues.
//!
//! Five independent queues decouple MQTT message receipt from database
//! writes. Each queue has exactly one consumer task, so jobs on the same
//! queue apply serially: that is what orders the relay-state-then-log
//! sequence and keeps board upserts from racing. Jobs on different
//! queues run concurrently and write disjoint tables.
//!
//! A failed job is logged at error level and the worker moves on;
//! retry/backoff policy belongs to the queue backend, not to the
//! consumers.

use std::sync::Arc;

use cabio_storage::{BoardKind, SensorKind, Stores};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::Result;

/// A sensor sample to persist.
#[derive(Debug, Clone)]
pub struct SensorJob {
    pub user_id: String,
    pub cabinet_id: String,
    pub kind: SensorKind,
    pub value: SensorValue,
    pub timestamp: i64,
}

/// Payload of a sensor job.
#[derive(Debug, Clone)]
pub enum SensorValue {
    /// Temperature or humidity scalar.
    Scalar(f64),
    /// Raw `X-Y` location string, split by the consumer.
    Raw(String),
}

/// A relay state report, still in the device's `id-STATE` form.
#[derive(Debug, Clone)]
pub struct RelayJob {
    pub user_id: String,
    pub cabinet_id: String,
    /// Raw `"<relay_id>-<ON|OFF>"` string from the relay feed.
    pub data: String,
    pub timestamp: i64,
}

/// A network address report.
#[derive(Debug, Clone)]
pub struct NetworkJob {
    pub user_id: String,
    pub cabinet_id: String,
    pub ip: String,
    pub timestamp: i64,
}

/// A firmware version report.
#[derive(Debug, Clone)]
pub struct BoardJob {
    pub user_id: String,
    pub cabinet_id: String,
    pub board: BoardKind,
    pub version: String,
    pub timestamp: i64,
}

/// An audit trail entry.
#[derive(Debug, Clone)]
pub struct LogJob {
    pub user_id: String,
    pub cabinet_id: String,
    pub activity: String,
    pub timestamp: i64,
}

/// Producer half of the five ingestion queues.
///
/// Cloneable and cheap; the router and the HTTP layer both hold one.
/// Enqueueing completes synchronously from the caller's perspective; the
/// eventual database write does not block the caller.
#[derive(Clone)]
pub struct IngestionQueues {
    sensor_tx: mpsc::UnboundedSender<SensorJob>,
    relay_tx: mpsc::UnboundedSender<RelayJob>,
    network_tx: mpsc::UnboundedSender<NetworkJob>,
    board_tx: mpsc::UnboundedSender<BoardJob>,
    log_tx: mpsc::UnboundedSender<LogJob>,
}

/// Consumer half, handed to `spawn_workers` exactly once.
pub struct QueueReceivers {
    sensor_rx: mpsc::UnboundedReceiver<SensorJob>,
    relay_rx: mpsc::UnboundedReceiver<RelayJob>,
    network_rx: mpsc::UnboundedReceiver<NetworkJob>,
    board_rx: mpsc::UnboundedReceiver<BoardJob>,
    log_rx: mpsc::UnboundedReceiver<LogJob>,
}

impl IngestionQueues {
    /// Create the queue set.
    pub fn new() -> (Self, QueueReceivers) {
        let (sensor_tx, sensor_rx) = mpsc::unbounded_channel();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (network_tx, network_rx) = mpsc::unbounded_channel();
        let (board_tx, board_rx) = mpsc::unbounded_channel();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        (
            Self {
                sensor_tx,
                relay_tx,
                network_tx,
                board_tx,
                log_tx,
            },
            QueueReceivers {
                sensor_rx,
                relay_rx,
                network_rx,
                board_rx,
                log_rx,
            },
        )
    }

    pub fn enqueue_sensor(&self, job: SensorJob) {
        if self.sensor_tx.send(job).is_err() {
            warn!(queue = "sensor", "enqueue dropped: consumer is gone");
        }
    }

    pub fn enqueue_relay(&self, job: RelayJob) {
        if self.relay_tx.send(job).is_err() {
            warn!(queue = "relay", "enqueue dropped: consumer is gone");
        }
    }

    pub fn enqueue_network(&self, job: NetworkJob) {
        if self.network_tx.send(job).is_err() {
            warn!(queue = "network", "enqueue dropped: consumer is gone");
        }
    }

    pub fn enqueue_board(&self, job: BoardJob) {
        if self.board_tx.send(job).is_err() {
            warn!(queue = "board", "enqueue dropped: consumer is gone");
        }
    }

    pub fn enqueue_log(&self, job: LogJob) {
        if self.log_tx.send(job).is_err() {
            warn!(queue = "log", "enqueue dropped: consumer is gone");
        }
    }

}

/// Spawn one consumer task per queue. Workers run until every producer
/// handle of their queue is dropped.
pub fn spawn_workers(stores: Arc<Stores>, receivers: QueueReceivers) -> Vec<JoinHandle<()>> {
    let QueueReceivers {
        mut sensor_rx,
        mut relay_rx,
        mut network_rx,
        mut board_rx,
        mut log_rx,
    } = receivers;

    // The relay consumer appends to the log queue after a successful
    // state change. It gets its own sender so the log worker keeps
    // running for as long as relay jobs may arrive.
    let (relay_log_tx, mut relay_log_rx) = mpsc::unbounded_channel::<LogJob>();

    let sensor_stores = stores.clone();
    let sensor = tokio::spawn(async move {
        while let Some(job) = sensor_rx.recv().await {
            if let Err(e) = apply_sensor_job(&sensor_stores, &job) {
                error!(queue = "sensor", error = %e, "sensor job failed");
            }
        }
    });

    let relay_stores = stores.clone();
    let relay = tokio::spawn(async move {
        while let Some(job) = relay_rx.recv().await {
            if let Err(e) = apply_relay_job(&relay_stores, &relay_log_tx, &job) {
                error!(queue = "relay", error = %e, "relay job failed");
            }
        }
    });

    let network_stores = stores.clone();
    let network = tokio::spawn(async move {
        while let Some(job) = network_rx.recv().await {
            if let Err(e) = apply_network_job(&network_stores, &job) {
                error!(queue = "network", error = %e, "network job failed");
            }
        }
    });

    let board_stores = stores.clone();
    let board = tokio::spawn(async move {
        while let Some(job) = board_rx.recv().await {
            if let Err(e) = apply_board_job(&board_stores, &job) {
                error!(queue = "board", error = %e, "board job failed");
            }
        }
    });

    let log_stores = stores;
    let log = tokio::spawn(async move {
        // Two producers feed this queue: the public sender set and the
        // relay worker's chained audit entries. Run until both close.
        let mut direct_open = true;
        let mut chained_open = true;
        while direct_open || chained_open {
            let job = tokio::select! {
                job = log_rx.recv(), if direct_open => {
                    if job.is_none() {
                        direct_open = false;
                    }
                    job
                }
                job = relay_log_rx.recv(), if chained_open => {
                    if job.is_none() {
                        chained_open = false;
                    }
                    job
                }
            };
            if let Some(job) = job {
                if let Err(e) = apply_log_job(&log_stores, &job) {
                    error!(queue = "log", error = %e, "log job failed");
                }
            }
        }
    });

    vec![sensor, relay, network, board, log]
}

/// Persist one sensor job. Location strings split on `-`; a malformed
/// pair is a job failure.
pub fn apply_sensor_job(stores: &Stores, job: &SensorJob) -> Result<()> {
    match (&job.kind, &job.value) {
        (SensorKind::Temperature, SensorValue::Scalar(v))
        | (SensorKind::Humidity, SensorValue::Scalar(v)) => {
            stores
                .sensors
                .append_scalar(job.kind, &job.user_id, &job.cabinet_id, *v, job.timestamp)?;
            Ok(())
        }
        (SensorKind::Location, SensorValue::Raw(raw)) => {
            let (x, y) = parse_coordinate_pair(raw).ok_or_else(|| {
                cabio_storage::Error::InvalidInput(format!("bad location data {:?}", raw))
            })?;
            stores
                .sensors
                .append_location(&job.user_id, &job.cabinet_id, x, y, job.timestamp)?;
            Ok(())
        }
        (kind, value) => Err(cabio_storage::Error::InvalidInput(format!(
            "sensor job mismatch: {} with {:?}",
            kind, value
        ))
        .into()),
    }
}

/// Persist one relay job: parse `id-STATE`, update the relay, then chain
/// the audit entry. A missing relay is dropped with an error log, not
/// auto-created. The log enqueue is best-effort and never undoes the
/// state change.
pub fn apply_relay_job(
    stores: &Stores,
    log_tx: &mpsc::UnboundedSender<LogJob>,
    job: &RelayJob,
) -> Result<()> {
    let (relay_id, state) = match parse_relay_data(&job.data) {
        Some(parsed) => parsed,
        None => {
            return Err(cabio_storage::Error::InvalidInput(format!(
                "bad relay data {:?}",
                job.data
            ))
            .into())
        }
    };

    match stores
        .relays
        .set_state(&job.user_id, &job.cabinet_id, relay_id, state)?
    {
        Some(relay) => {
            let activity = format!(
                "Relay {} {}",
                relay.relay_id,
                if relay.state { "ON" } else { "OFF" }
            );
            let log_job = LogJob {
                user_id: job.user_id.clone(),
                cabinet_id: job.cabinet_id.clone(),
                activity,
                timestamp: job.timestamp,
            };
            if log_tx.send(log_job).is_err() {
                warn!(queue = "relay", "log entry dropped: log consumer is gone");
            }
            Ok(())
        }
        None => {
            error!(
                relay_id,
                cabinet_id = %job.cabinet_id,
                user_id = %job.user_id,
                "relay not found, dropping state report"
            );
            Ok(())
        }
    }
}

/// Persist one network job.
pub fn apply_network_job(stores: &Stores, job: &NetworkJob) -> Result<()> {
    stores
        .network
        .upsert(&job.user_id, &job.cabinet_id, &job.ip, job.timestamp)?;
    Ok(())
}

/// Persist one board job: the canonical idempotent upsert.
pub fn apply_board_job(stores: &Stores, job: &BoardJob) -> Result<()> {
    stores.boards.upsert(
        &job.user_id,
        &job.cabinet_id,
        job.board,
        &job.version,
        job.timestamp,
    )?;
    Ok(())
}

/// Persist one log job.
pub fn apply_log_job(stores: &Stores, job: &LogJob) -> Result<()> {
    stores
        .logs
        .append(&job.user_id, &job.cabinet_id, &job.activity, job.timestamp)?;
    Ok(())
}

/// Parse a device relay report `"<id>-<STATE>"`. The state token is
/// compared case-insensitively: `ON` means on, anything else means off.
pub fn parse_relay_data(data: &str) -> Option<(u32, bool)> {
    let (id, state) = data.split_once('-')?;
    let relay_id: u32 = id.trim().parse().ok()?;
    Some((relay_id, state.trim().eq_ignore_ascii_case("on")))
}

/// Parse an `X-Y` coordinate pair.
pub fn parse_coordinate_pair(data: &str) -> Option<(f64, f64)> {
    let (x, y) = data.split_once('-')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabio_storage::{BoardKind, Relay};
    use tempfile::TempDir;

    fn open_stores(dir: &TempDir) -> Arc<Stores> {
        Stores::open(dir.path()).unwrap()
    }

    fn seed_relay(stores: &Stores, relay_id: u32) {
        stores
            .relays
            .add(
                &Relay {
                    user_id: "u1".to_string(),
                    cabinet_id: "c1".to_string(),
                    relay_id,
                    relay_name: format!("Relay {}", relay_id),
                    state: false,
                    relay_home: false,
                },
                None,
            )
            .unwrap();
    }

    #[test]
    fn test_parse_relay_data() {
        assert_eq!(parse_relay_data("4-ON"), Some((4, true)));
        assert_eq!(parse_relay_data("4-on"), Some((4, true)));
        assert_eq!(parse_relay_data("12-OFF"), Some((12, false)));
        assert_eq!(parse_relay_data("3-whatever"), Some((3, false)));
        assert_eq!(parse_relay_data("x-ON"), None);
        assert_eq!(parse_relay_data("ON"), None);
    }

    #[test]
    fn test_parse_coordinate_pair() {
        assert_eq!(parse_coordinate_pair("10.5-20.25"), Some((10.5, 20.25)));
        assert_eq!(parse_coordinate_pair("10.5"), None);
        assert_eq!(parse_coordinate_pair("a-b"), None);
    }

    #[test]
    fn test_relay_job_updates_state_and_chains_log() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        seed_relay(&stores, 4);

        let (log_tx, mut log_rx) = mpsc::unbounded_channel();
        let job = RelayJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            data: "4-ON".to_string(),
            timestamp: 1000,
        };
        apply_relay_job(&stores, &log_tx, &job).unwrap();

        assert!(stores.relays.get("u1", "c1", 4).unwrap().unwrap().state);

        let log_job = log_rx.try_recv().unwrap();
        assert!(log_job.activity.contains('4'));
        assert!(log_job.activity.contains("ON"));
        // Exactly one log entry.
        assert!(log_rx.try_recv().is_err());
    }

    #[test]
    fn test_relay_job_missing_relay_is_dropped() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        let (log_tx, mut log_rx) = mpsc::unbounded_channel();
        let job = RelayJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            data: "9-ON".to_string(),
            timestamp: 1000,
        };
        // Not an error: dropped with a log line, no audit entry.
        apply_relay_job(&stores, &log_tx, &job).unwrap();
        assert!(log_rx.try_recv().is_err());
    }

    #[test]
    fn test_relay_job_bad_data_fails() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        let (log_tx, _log_rx) = mpsc::unbounded_channel();
        let job = RelayJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            data: "garbage".to_string(),
            timestamp: 1000,
        };
        assert!(apply_relay_job(&stores, &log_tx, &job).is_err());
    }

    #[test]
    fn test_board_job_upserts() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        let mut job = BoardJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            board: BoardKind::Relay6ch,
            version: "1.0.0".to_string(),
            timestamp: 1000,
        };
        apply_board_job(&stores, &job).unwrap();
        job.version = "1.1.0".to_string();
        job.timestamp = 2000;
        apply_board_job(&stores, &job).unwrap();

        let boards = stores.boards.list_for_cabinet("u1", "c1").unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].version, "1.1.0");
    }

    #[test]
    fn test_sensor_job_location_split() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        let job = SensorJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            kind: SensorKind::Location,
            value: SensorValue::Raw("10.77-106.69".to_string()),
            timestamp: 1000,
        };
        apply_sensor_job(&stores, &job).unwrap();

        let latest = stores.sensors.latest_location("u1", "c1").unwrap().unwrap();
        assert_eq!(latest.x, 10.77);
        assert_eq!(latest.y, 106.69);
    }

    #[test]
    fn test_sensor_job_bad_location_fails() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);

        let job = SensorJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            kind: SensorKind::Location,
            value: SensorValue::Raw("nowhere".to_string()),
            timestamp: 1000,
        };
        assert!(apply_sensor_job(&stores, &job).is_err());
    }

    #[tokio::test]
    async fn test_workers_drain_and_exit() {
        let dir = TempDir::new().unwrap();
        let stores = open_stores(&dir);
        seed_relay(&stores, 2);

        let (queues, receivers) = IngestionQueues::new();
        let handles = spawn_workers(stores.clone(), receivers);

        queues.enqueue_sensor(SensorJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            kind: SensorKind::Temperature,
            value: SensorValue::Scalar(22.5),
            timestamp: 1000,
        });
        queues.enqueue_relay(RelayJob {
            user_id: "u1".to_string(),
            cabinet_id: "c1".to_string(),
            data: "2-ON".to_string(),
            timestamp: 1000,
        });

        // Dropping the producer half lets every worker drain and exit.
        drop(queues);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            stores
                .sensors
                .latest_scalar(SensorKind::Temperature, "u1", "c1")
                .unwrap()
                .unwrap()
                .value,
            22.5
        );
        assert!(stores.relays.get("u1", "c1", 2).unwrap().unwrap().state);
        // The relay worker's audit entry flowed through the log queue.
        assert_eq!(stores.logs.count("u1", "c1").unwrap(), 1);
    }
}
