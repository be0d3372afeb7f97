//! Hydra Core Library
//!
//! The orchestration engine of the Hydra security-audit pipeline: scope
//! resolution, threat modelling, bounded agent dispatch, finding aggregation,
//! adversarial validation, patching, and the sandbox supervisor.

pub mod adversarial;
pub mod aggregator;
pub mod cache;
pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod domain;
pub mod git;
pub mod orchestrator;
pub mod patcher;
pub mod reasoner;
pub mod reporting;
pub mod sandbox;
pub mod scanner;
pub mod telemetry;
pub mod threat_model;

pub use domain::{
    AdversarialResult, AgentRun, AgentStatus, BlueRecommendation, BlueTeamAssessment, DiffSpec,
    Finding, HydraError, IssueSeverity, JudgeVerdict, PatchProposal, PatchResult, PatchReview,
    PatchStatus, RedTeamAssessment, Result, ReviewIssue, ScanMode, ScanReport, ScanTarget,
    Severity, StageTiming, Verdict, VulnClass,
};

pub use adversarial::{filter_by_verdict, AdversarialPipeline, MIN_ADVERSARIAL_CONFIDENCE};
pub use aggregator::{FindingAggregator, MIN_UNCORROBORATED_CONFIDENCE};
pub use cache::{CacheEntry, CacheStats, ScanCache};
pub use config::HydraConfig;
pub use digest::{hash12, hash16, sha256_hex};
pub use dispatcher::{AgentDispatcher, CancelToken, DispatchOutcome, DEFAULT_MAX_CONCURRENT};
pub use git::{capture_context, resolve_changed_files, GitContext};
pub use orchestrator::{DiffOptions, HydraOrchestrator, ScanOptions};
pub use patcher::{apply_unified_diff, PatchApplyError, PatchPipeline};
pub use reasoner::{
    extract_json, parse_response, HttpReasoner, Reasoner, ReasonerError, ReasonerRequest,
    ScriptedReasoner,
};
pub use reporting::{
    render_markdown, render_sarif, write_report_json, write_report_markdown, write_report_sarif,
};
pub use sandbox::{
    ExecResult, SandboxError, SandboxOverrides, SandboxProfile, SandboxSession, SandboxSupervisor,
};
pub use scanner::{
    AgentTask, Scanner, ScannerTask, DEFAULT_AGENT_TIMEOUT, LLM_AGENT_TIMEOUT,
};
pub use telemetry::init_tracing;
pub use threat_model::{
    LoadedThreatModel, ThreatModelStore, ThreatModelSummary, ThreatModelVersion,
};

/// Hydra version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
