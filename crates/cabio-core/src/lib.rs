//! Shared foundation for the Cabio cabinet backend.
//!
//! This crate holds what every other Cabio crate needs: the common error
//! type, environment-driven configuration, and timestamp helpers. It has
//! no knowledge of MQTT, HTTP or storage.

pub mod config;
pub mod error;
pub mod time;

pub use config::{AppConfig, BrokerConfig};
pub use error::{Error, Result};
