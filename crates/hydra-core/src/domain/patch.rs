//! Typed patch proposals, reviews, and outcomes.

use serde::{Deserialize, Serialize};

/// A candidate fix produced by the patch agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchProposal {
    pub finding_id: String,
    pub file: String,
    pub unified_diff: String,
    pub explanation: String,
    pub root_cause: String,
    pub test_code: Option<String>,
    pub breaking_changes: Vec<String>,
}

impl PatchProposal {
    /// A proposal with no diff carries nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.unified_diff.trim().is_empty()
    }
}

/// Severity of a review issue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// One concern raised during patch review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub message: String,
}

impl ReviewIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            message: message.into(),
        }
    }
}

/// Outcome of reviewing one patch proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchReview {
    pub approved: bool,
    pub issues: Vec<ReviewIssue>,
    pub suggestions: Vec<String>,
    /// `Some(true)` when the sandboxed exploit no longer succeeds against the
    /// patched source; `None` when the retest could not run.
    pub exploit_retest_passed: Option<bool>,
    pub regression_check_passed: Option<bool>,
}

/// Final status of the patch pipeline for one finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    PatchedAndVerified,
    PatchedNeedsReview,
    PatchRejected,
    NoPatch,
    Skipped,
}

/// Per-finding patch pipeline result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchResult {
    pub finding_id: String,
    pub status: PatchStatus,
    pub proposal: Option<PatchProposal>,
    pub review: Option<PatchReview>,
}

impl PatchResult {
    pub fn skipped(finding_id: impl Into<String>) -> Self {
        Self {
            finding_id: finding_id.into(),
            status: PatchStatus::Skipped,
            proposal: None,
            review: None,
        }
    }

    pub fn no_patch(finding_id: impl Into<String>) -> Self {
        Self {
            finding_id: finding_id.into(),
            status: PatchStatus::NoPatch,
            proposal: None,
            review: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_proposal_detection() {
        let p = PatchProposal {
            finding_id: "abc".to_string(),
            file: "/repo/src/lib.rs".to_string(),
            unified_diff: "  \n".to_string(),
            explanation: String::new(),
            root_cause: String::new(),
            test_code: None,
            breaking_changes: vec![],
        };
        assert!(p.is_empty());
    }

    #[test]
    fn status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&PatchStatus::PatchedAndVerified).unwrap(),
            "\"patched_and_verified\""
        );
        assert_eq!(
            serde_json::to_string(&PatchStatus::NoPatch).unwrap(),
            "\"no_patch\""
        );
    }

    #[test]
    fn issue_constructors() {
        let e = ReviewIssue::error("context mismatch");
        assert_eq!(e.severity, IssueSeverity::Error);
        let w = ReviewIssue::warning("sandbox unavailable");
        assert_eq!(w.severity, IssueSeverity::Warning);
    }
}
