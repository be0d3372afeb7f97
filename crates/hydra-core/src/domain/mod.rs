//! Domain model for the Hydra pipeline.
//!
//! # Modules
//!
//! - [`finding`] — `Severity`, `VulnClass`, `Finding`
//! - [`target`] — `ScanTarget`, `ScanMode`, `DiffSpec`
//! - [`agent_run`] — per-agent lifecycle records
//! - [`adversarial`] — red/blue/judge typed outputs and `Verdict`
//! - [`patch`] — patch proposals, reviews, and statuses
//! - [`report`] — the composed `ScanReport`
//! - [`error`] — `HydraError` / `Result`

pub mod adversarial;
pub mod agent_run;
pub mod error;
pub mod finding;
pub mod patch;
pub mod report;
pub mod target;

pub use adversarial::{
    infer_verdict, AdversarialResult, BlueRecommendation, BlueTeamAssessment, JudgeVerdict,
    RedTeamAssessment, Verdict,
};
pub use agent_run::{AgentRun, AgentStatus};
pub use error::{HydraError, Result};
pub use finding::{Finding, Severity, VulnClass};
pub use patch::{
    IssueSeverity, PatchProposal, PatchResult, PatchReview, PatchStatus, ReviewIssue,
};
pub use report::{ScanReport, StageTiming};
pub use target::{DiffSpec, ScanMode, ScanTarget};
