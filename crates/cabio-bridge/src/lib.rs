//! The Cabio broker bridge: ingestion and command dispatch.
//!
//! This crate is the core of the system. It owns:
//!
//! - the per-user broker session registry ([`registry`]),
//! - topic-to-event routing for inbound device messages ([`feed`],
//!   [`router`]),
//! - the asynchronous ingestion queues decoupling message receipt from
//!   database writes ([`queues`]),
//! - outbound command publishing ([`publish`]),
//! - cabinet resolution and auto-provisioning ([`resolve`]).
//!
//! Data flows device → broker → router → queue → store on the way in,
//! and HTTP → command payload → broker session → device on the way out.
//! Cabinet resolution sits in front of both directions.

pub mod error;
pub mod feed;
pub mod publish;
pub mod queues;
pub mod registry;
pub mod resolve;
pub mod router;

pub use error::{BridgeError, Result};
pub use feed::Feed;
pub use publish::{CommandMode, CommandPayload};
pub use queues::{
    spawn_workers, BoardJob, IngestionQueues, LogJob, NetworkJob, QueueReceivers, RelayJob,
    SensorJob, SensorValue,
};
pub use registry::SessionRegistry;
pub use resolve::CabinetResolver;
pub use router::{route, FeedRouter, IngestKind, RoutedEvent};
