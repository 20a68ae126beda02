//! REST layer over the Cabio bridge and stores.
//!
//! Controllers here are deliberately thin: authentication, request
//! validation and response shaping. All device-facing work goes through
//! the bridge's public contract (session registry, ingestion queues,
//! command publisher) and the storage crate.

pub mod auth;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod server;

pub use auth::TokenKeys;
pub use server::{build_router, serve, ServerState};
