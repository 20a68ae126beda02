//! End-to-end ingestion pipeline tests: router → resolver → queues →
//! workers → stores, without a live broker.

use std::sync::Arc;

use cabio_bridge::{spawn_workers, CabinetResolver, FeedRouter, IngestionQueues};
use cabio_storage::{Relay, Role, SensorKind, Stores, User};
use tempfile::TempDir;

fn seed_user(stores: &Stores) {
    stores
        .users
        .create(&User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            fullname: "Alice".to_string(),
            email: "a@example.com".to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
            broker_username: Some("aio_user".to_string()),
            broker_key: Some("aio_key".to_string()),
            phone_number: None,
            refresh_token: None,
            created_at: 0,
        })
        .unwrap();
}

struct Pipeline {
    stores: Arc<Stores>,
    router: FeedRouter,
    queues: IngestionQueues,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

fn build_pipeline(dir: &TempDir) -> Pipeline {
    let stores = Stores::open(dir.path()).unwrap();
    seed_user(&stores);
    let (queues, receivers) = IngestionQueues::new();
    let workers = spawn_workers(stores.clone(), receivers);
    let router = FeedRouter::new(CabinetResolver::new(stores.clone()), queues.clone());
    Pipeline {
        stores,
        router,
        queues,
        workers,
    }
}

impl Pipeline {
    /// Drop every producer handle and wait for the workers to drain.
    async fn drain(self) -> Arc<Stores> {
        let Pipeline {
            stores,
            router,
            queues,
            workers,
        } = self;
        drop(router);
        drop(queues);
        for worker in workers {
            worker.await.unwrap();
        }
        stores
    }
}

#[tokio::test]
async fn test_registration_provisions_cabinet() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    pipeline.router.handle_message(
        "aio_user/feeds/device_id",
        br#"{"email": "a@example.com", "device_id": "dev-1"}"#,
    );

    let stores = pipeline.drain().await;
    let cabinet = stores.cabinets.find_by_device("u1", "dev-1").unwrap().unwrap();
    assert_eq!(cabinet.name, "Cabinet 1");
}

#[tokio::test]
async fn test_telemetry_for_unknown_device_is_dropped() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    // No registration happened for this device: the sensor paths must
    // not auto-create a cabinet, and nothing may be stored.
    pipeline.router.handle_message(
        "aio_user/feeds/temperature",
        br#"{"email": "a@example.com", "device_id": "ghost", "data": "23.5"}"#,
    );

    let stores = pipeline.drain().await;
    assert_eq!(stores.cabinets.count_for_user("u1").unwrap(), 0);
}

#[tokio::test]
async fn test_temperature_flows_to_store() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    pipeline.router.handle_message(
        "aio_user/feeds/device_id",
        br#"{"email": "a@example.com", "device_id": "dev-1"}"#,
    );
    pipeline.router.handle_message(
        "aio_user/feeds/temperature",
        br#"{"email": "a@example.com", "device_id": "dev-1", "data": "23.5"}"#,
    );

    let stores = pipeline.drain().await;
    let cabinet = stores.cabinets.find_by_device("u1", "dev-1").unwrap().unwrap();
    let latest = stores
        .sensors
        .latest_scalar(SensorKind::Temperature, "u1", &cabinet.id)
        .unwrap()
        .unwrap();
    assert_eq!(latest.value, 23.5);
}

#[tokio::test]
async fn test_history_sample_writes_both_series() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    pipeline.router.handle_message(
        "aio_user/feeds/device_id",
        br#"{"email": "a@example.com", "device_id": "dev-1"}"#,
    );
    pipeline.router.handle_message(
        "aio_user/feeds/history",
        br#"{"email": "a@example.com", "device_id": "dev-1", "mode": "Temp_Humi",
            "data": "23.5-45.2", "time": "14:30:05 02/01/2025"}"#,
    );

    let stores = pipeline.drain().await;
    let cabinet = stores.cabinets.find_by_device("u1", "dev-1").unwrap().unwrap();

    let temperature = stores
        .sensors
        .latest_scalar(SensorKind::Temperature, "u1", &cabinet.id)
        .unwrap()
        .unwrap();
    let humidity = stores
        .sensors
        .latest_scalar(SensorKind::Humidity, "u1", &cabinet.id)
        .unwrap()
        .unwrap();
    assert_eq!(temperature.value, 23.5);
    assert_eq!(humidity.value, 45.2);
    assert_eq!(temperature.timestamp, humidity.timestamp);
}

#[tokio::test]
async fn test_history_zero_sentinel_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    pipeline.router.handle_message(
        "aio_user/feeds/device_id",
        br#"{"email": "a@example.com", "device_id": "dev-1"}"#,
    );
    pipeline.router.handle_message(
        "aio_user/feeds/history",
        br#"{"email": "a@example.com", "device_id": "dev-1", "mode": "Temp_Humi",
            "data": "0-45.2"}"#,
    );

    let stores = pipeline.drain().await;
    let cabinet = stores.cabinets.find_by_device("u1", "dev-1").unwrap().unwrap();
    assert_eq!(
        stores
            .sensors
            .count_scalars(SensorKind::Temperature, "u1", &cabinet.id)
            .unwrap(),
        0
    );
    assert_eq!(
        stores
            .sensors
            .count_scalars(SensorKind::Humidity, "u1", &cabinet.id)
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_relay_report_updates_state_and_logs() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    pipeline.router.handle_message(
        "aio_user/feeds/device_id",
        br#"{"email": "a@example.com", "device_id": "dev-1"}"#,
    );
    // The relay must exist before its state can be reported.
    let cabinet = pipeline
        .stores
        .cabinets
        .find_by_device("u1", "dev-1")
        .unwrap()
        .unwrap();
    pipeline
        .stores
        .relays
        .add(
            &Relay {
                user_id: "u1".to_string(),
                cabinet_id: cabinet.id.clone(),
                relay_id: 4,
                relay_name: "Relay 4".to_string(),
                state: false,
                relay_home: false,
            },
            None,
        )
        .unwrap();

    pipeline.router.handle_message(
        "aio_user/feeds/relay",
        br#"{"email": "a@example.com", "device_id": "dev-1", "data": "4-ON"}"#,
    );

    let stores = pipeline.drain().await;
    assert!(stores.relays.get("u1", &cabinet.id, 4).unwrap().unwrap().state);

    let entries = stores.logs.list_recent("u1", &cabinet.id, 10).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].activity.contains('4'));
    assert!(entries[0].activity.contains("ON"));
}

#[tokio::test]
async fn test_firmware_and_ip_reports() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    pipeline.router.handle_message(
        "aio_user/feeds/device_id",
        br#"{"email": "a@example.com", "device_id": "dev-1"}"#,
    );
    pipeline.router.handle_message(
        "aio_user/feeds/firmware",
        br#"{"email": "a@example.com", "device_id": "dev-1", "mode": "2.1.0",
            "data": "Relay 6ch"}"#,
    );
    pipeline.router.handle_message(
        "aio_user/feeds/ip",
        br#"{"email": "a@example.com", "device_id": "dev-1", "data": "192.168.1.40"}"#,
    );

    let stores = pipeline.drain().await;
    let cabinet = stores.cabinets.find_by_device("u1", "dev-1").unwrap().unwrap();

    let boards = stores.boards.list_for_cabinet("u1", &cabinet.id).unwrap();
    assert_eq!(boards.len(), 1);
    assert_eq!(boards[0].version, "2.1.0");

    let network = stores.network.get("u1", &cabinet.id).unwrap().unwrap();
    assert_eq!(network.ip, "192.168.1.40");
}

#[tokio::test]
async fn test_unknown_user_events_ignored() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir);

    pipeline.router.handle_message(
        "aio_user/feeds/device_id",
        br#"{"email": "nobody@example.com", "device_id": "dev-1"}"#,
    );
    pipeline.router.handle_message(
        "aio_user/feeds/temperature",
        br#"{"email": "nobody@example.com", "device_id": "dev-1", "data": "23.5"}"#,
    );

    let stores = pipeline.drain().await;
    assert_eq!(stores.cabinets.count_for_user("u1").unwrap(), 0);
}
