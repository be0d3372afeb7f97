//! Typed outputs of the adversarial validation roles.

use serde::{Deserialize, Serialize};

use crate::domain::finding::{Finding, Severity};

/// The judge's arbitration outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Confirmed,
    Likely,
    Disputed,
    FalsePositive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Confirmed => f.write_str("confirmed"),
            Verdict::Likely => f.write_str("likely"),
            Verdict::Disputed => f.write_str("disputed"),
            Verdict::FalsePositive => f.write_str("false_positive"),
        }
    }
}

/// Blue-team bottom line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlueRecommendation {
    Confirmed,
    Mitigated,
    Infeasible,
}

/// Red-team assessment: can this be exploited, and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedTeamAssessment {
    pub exploitable: bool,
    pub exploit_code: Option<String>,
    pub attack_steps: Vec<String>,
    pub economic_impact: Option<String>,
    /// Confidence in [0, 100].
    pub confidence: u8,
    pub reason: Option<String>,
    /// Whether the exploit was actually run inside a sandbox session.
    pub sandbox_executed: bool,
    pub sandbox_exit_code: Option<i32>,
    pub sandbox_stdout: Option<String>,
}

impl RedTeamAssessment {
    /// Conservative default used when the reasoner output cannot be parsed.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            exploitable: false,
            exploit_code: None,
            attack_steps: Vec::new(),
            economic_impact: None,
            confidence: 0,
            reason: Some(reason.into()),
            sandbox_executed: false,
            sandbox_exit_code: None,
            sandbox_stdout: None,
        }
    }
}

/// Blue-team assessment: mitigations, reachability, feasibility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueTeamAssessment {
    pub existing_mitigations: Vec<String>,
    pub reachable: bool,
    pub reachability_reasoning: String,
    pub env_protections: Vec<String>,
    pub economically_feasible: bool,
    /// Risk reduction in [0, 100].
    pub overall_risk_reduction: u8,
    pub recommendation: BlueRecommendation,
}

impl BlueTeamAssessment {
    /// Conservative default: the finding stands with no known mitigations.
    pub fn fallback(reasoning: impl Into<String>) -> Self {
        Self {
            existing_mitigations: Vec::new(),
            reachable: true,
            reachability_reasoning: reasoning.into(),
            env_protections: Vec::new(),
            economically_feasible: true,
            overall_risk_reduction: 0,
            recommendation: BlueRecommendation::Confirmed,
        }
    }
}

/// The judge's typed verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    pub verdict: Verdict,
    pub final_severity: Severity,
    /// Confidence in [0, 100].
    pub final_confidence: u8,
    pub reasoning: String,
    pub evidence_summary: String,
}

/// Per-finding adversarial result. Role slots are `None` when a role failed
/// outright; the pipeline never aborts on a single finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdversarialResult {
    pub finding: Finding,
    pub red_team: Option<RedTeamAssessment>,
    pub blue_team: Option<BlueTeamAssessment>,
    pub judge: Option<JudgeVerdict>,
}

/// Deterministic verdict inference used when the judge reasoner fails to
/// produce a parseable verdict.
pub fn infer_verdict(
    finding: &Finding,
    red: Option<&RedTeamAssessment>,
    blue: Option<&BlueTeamAssessment>,
) -> JudgeVerdict {
    let verdict = if red.map(|r| r.sandbox_executed && r.sandbox_exit_code == Some(0))
        == Some(true)
    {
        Verdict::Confirmed
    } else if red.map(|r| r.exploitable && r.confidence >= 70) == Some(true) {
        Verdict::Likely
    } else if blue.map(|b| b.recommendation) == Some(BlueRecommendation::Mitigated) {
        Verdict::Disputed
    } else if blue.map(|b| b.recommendation) == Some(BlueRecommendation::Infeasible) {
        Verdict::FalsePositive
    } else {
        Verdict::Likely
    };

    JudgeVerdict {
        verdict,
        final_severity: finding.severity,
        final_confidence: finding.confidence,
        reasoning: format!(
            "deterministic inference (judge unavailable): verdict {verdict} from role signals"
        ),
        evidence_summary: red
            .and_then(|r| r.reason.clone())
            .unwrap_or_else(|| "no red-team evidence".to_string()),
    }
}
