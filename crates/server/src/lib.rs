//! HTTP server for pyre, a burn-after-read encrypted blob service.
//!
//! This crate provides:
//! - Chunked upload and upload status endpoints
//! - Artifact store, read, download and burn endpoints
//! - The bounded burn worker pool
//! - The periodic cleanup scheduler

pub mod burn;
pub mod cleanup;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use burn::{BurnError, BurnOrigin, BurnQueue, BurnTicket};
pub use cleanup::{CleanupReport, CleanupScheduler};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
