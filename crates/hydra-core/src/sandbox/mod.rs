//! Sandbox: ephemeral hardened execution environments.
//!
//! The supervisor creates short-lived containers from pre-built profile
//! images, runs commands in them under wall-time caps with bounded output,
//! and guarantees teardown on every exit path.  Any runtime failure is a
//! typed [`SandboxError`]; callers degrade (for example, red-team analysis
//! without sandbox evidence) instead of aborting the scan.
//!
//! # Modules
//!
//! - [`profile`] — `SandboxProfile` (generic / solana) and hardening flags
//! - [`supervisor`] — `SandboxSupervisor` probes + `SandboxSession`
//! - [`error`] — `SandboxError` / `SandboxResult`

pub mod error;
pub mod profile;
pub mod supervisor;

pub use error::{SandboxError, SandboxResult};
pub use profile::{SandboxOverrides, SandboxProfile};
pub use supervisor::{ExecResult, SandboxSession, SandboxSupervisor};
