//! hydrad — the Hydra HTTP trigger daemon.
//!
//! Run history is process-local and bounded; the daemon offers no durable
//! persistence and no mid-run cancellation. Shutdown waits for in-flight
//! runs to settle.

pub mod auth;
pub mod config;
pub mod runs;
pub mod server;

pub use auth::constant_time_eq;
pub use config::{DaemonConfig, DaemonConfigError};
pub use runs::{RunRecord, RunStatus, RunStore, MAX_STORED_RUNS};
pub use server::{router, serve, AppState, DaemonState};
