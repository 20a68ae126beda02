//! HTTP handlers, thin callers of the bridge and the stores.

pub mod auth;
pub mod cabinets;
pub mod connection;
pub mod logs;
pub mod relays;
pub mod schedules;
pub mod sensors;
