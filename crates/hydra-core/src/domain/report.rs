//! The composed output of one end-to-end scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::adversarial::AdversarialResult;
use crate::domain::agent_run::AgentRun;
use crate::domain::finding::Finding;
use crate::domain::patch::PatchResult;
use crate::domain::target::ScanTarget;
use crate::threat_model::ThreatModelVersion;

/// Wall-clock duration of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
}

/// Structured report for one scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: ScanTarget,
    pub threat_model: Option<ThreatModelVersion>,
    pub agent_runs: Vec<AgentRun>,
    pub findings: Vec<Finding>,
    pub adversarial_results: Option<Vec<AdversarialResult>>,
    pub patch_results: Option<Vec<PatchResult>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub stage_timings: Vec<StageTiming>,
}

impl ScanReport {
    /// Findings at or above the given severity.
    pub fn findings_at_least(
        &self,
        severity: crate::domain::finding::Severity,
    ) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity >= severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::{Severity, VulnClass};
    use crate::domain::target::ScanTarget;

    #[test]
    fn severity_filter() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let report = ScanReport {
            target: ScanTarget::full(dir.path()).unwrap(),
            threat_model: None,
            agent_runs: vec![],
            findings: vec![
                Finding::new(
                    "a",
                    VulnClass::SqlInjection,
                    Severity::Critical,
                    90,
                    "/r/a.rs",
                    1,
                    "t",
                    "",
                    "",
                ),
                Finding::new(
                    "b",
                    VulnClass::HardcodedSecret,
                    Severity::Low,
                    90,
                    "/r/b.rs",
                    1,
                    "t",
                    "",
                    "",
                ),
            ],
            adversarial_results: None,
            patch_results: None,
            started_at: now,
            completed_at: now,
            stage_timings: vec![],
        };
        assert_eq!(report.findings_at_least(Severity::High).count(), 1);
    }
}
