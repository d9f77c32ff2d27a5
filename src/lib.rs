//! evidence-gate - document access and review outcomes for health-card
//! registration
//!
//! ## Services
//!
//! - **Signing**: short-lived HMAC-signed URLs for one document each
//! - **Access**: owner-or-reviewer check, re-run at byte-serving time
//! - **Slots**: upload, flag and verify transitions per document slot
//! - **Reconciliation**: one view over the legacy and current outcome stores

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod outcomes;
pub mod routes;
pub mod server;
pub mod services;
pub mod signing;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, serve, AppState};
pub use types::{GateError, Result};
