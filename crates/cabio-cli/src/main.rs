//! Command-line interface for the Cabio cabinet backend.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cabio_api::{ServerState, TokenKeys};
use cabio_bridge::{spawn_workers, CabinetResolver, FeedRouter, IngestionQueues, SessionRegistry};
use cabio_core::config::{defaults, AppConfig};
use cabio_core::time::now_millis;
use cabio_storage::{SensorKind, Stores};
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Cabio - multi-tenant backend for relay-controlled IoT cabinets.
#[derive(Parser, Debug)]
#[command(name = "cabio")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory override (defaults to $CABIO_DATA_DIR or ./data).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server: connect every user's broker session and serve the
    /// REST API.
    Serve {
        /// Host to bind to.
        #[arg(long, default_value = defaults::HTTP_HOST)]
        host: String,
        /// Port to bind to.
        #[arg(short, long, default_value_t = defaults::HTTP_PORT)]
        port: u16,
    },
    /// Generate fake sensor history for a cabinet (development data).
    SeedSensors {
        /// Email of the owning user.
        #[arg(long)]
        email: String,
        /// Device id of the cabinet; defaults to the user's first cabinet.
        #[arg(long)]
        device_id: Option<String>,
        /// How many days back to fill.
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Minutes between samples.
        #[arg(long, default_value_t = 30)]
        interval_mins: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env();
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    match args.command {
        Command::Serve { host, port } => serve(config, &host, port).await,
        Command::SeedSensors {
            email,
            device_id,
            days,
            interval_mins,
        } => seed_sensors(config, &email, device_id.as_deref(), days, interval_mins),
    }
}

async fn serve(config: AppConfig, host: &str, port: u16) -> Result<()> {
    let stores = Stores::open(&config.data_dir)
        .with_context(|| format!("opening stores under {}", config.data_dir.display()))?;

    // Queue workers first, so ingestion can flow as soon as sessions
    // come up.
    let (queues, receivers) = IngestionQueues::new();
    let _workers = spawn_workers(stores.clone(), receivers);

    let router = Arc::new(FeedRouter::new(
        CabinetResolver::new(stores.clone()),
        queues.clone(),
    ));
    let registry = Arc::new(SessionRegistry::new(config.broker.clone(), router));

    let users = stores.users.list()?;
    let connected = registry.connect_all(&users).await;
    info!(connected, users = users.len(), "broker sessions established");

    let state = ServerState::new(
        stores,
        registry,
        queues,
        TokenKeys::new(&config.token_secret),
    );
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", host, port))?;
    cabio_api::serve(state, addr).await?;
    Ok(())
}

fn seed_sensors(
    config: AppConfig,
    email: &str,
    device_id: Option<&str>,
    days: u32,
    interval_mins: u32,
) -> Result<()> {
    if interval_mins == 0 {
        bail!("interval must be at least one minute");
    }

    let stores = Stores::open(&config.data_dir)?;
    let user = match stores.users.find_by_email(email)? {
        Some(user) => user,
        None => bail!("no user with email {}", email),
    };
    let cabinet = match device_id {
        Some(device_id) => stores.cabinets.find_by_device(&user.id, device_id)?,
        None => stores.cabinets.list_for_user(&user.id)?.into_iter().next(),
    };
    let cabinet = match cabinet {
        Some(cabinet) => cabinet,
        None => bail!("no cabinet found for {}", email),
    };

    let interval_millis = i64::from(interval_mins) * 60 * 1000;
    let start = now_millis() - i64::from(days) * 24 * 60 * 60 * 1000;
    let mut rng = rand::thread_rng();
    let mut timestamp = start;
    let mut count = 0usize;

    while timestamp < now_millis() {
        let temperature: f64 = rng.gen_range(22.0..34.0);
        let humidity: f64 = rng.gen_range(45.0..90.0);
        stores.sensors.append_scalar(
            SensorKind::Temperature,
            &user.id,
            &cabinet.id,
            (temperature * 10.0).round() / 10.0,
            timestamp,
        )?;
        stores.sensors.append_scalar(
            SensorKind::Humidity,
            &user.id,
            &cabinet.id,
            (humidity * 10.0).round() / 10.0,
            timestamp,
        )?;
        timestamp += interval_millis;
        count += 2;
    }

    info!(
        count,
        cabinet = %cabinet.name,
        email,
        "seeded fake sensor readings"
    );
    Ok(())
}
