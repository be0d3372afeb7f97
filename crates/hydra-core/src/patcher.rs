//! Patch pipeline: generate, apply, re-exploit, accept or reject.
//!
//! Patches are only attempted for findings the judge confirmed or called
//! likely. Unified diffs are applied line-oriented with strict context
//! verification — a hunk that does not match the source refuses to apply and
//! rejects the patch. When a red-team exploit exists and the sandbox is
//! available, the exploit is re-run against the patched source; a still-
//! succeeding exploit overrides any reviewer approval.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::adversarial::{AdversarialResult, Verdict};
use crate::domain::patch::{
    PatchProposal, PatchResult, PatchReview, PatchStatus, ReviewIssue,
};
use crate::reasoner::{parse_response, Reasoner, ReasonerRequest};
use crate::sandbox::{SandboxProfile, SandboxSupervisor};

/// Default bound on simultaneous patch attempts.
pub const DEFAULT_PATCH_CONCURRENCY: usize = 2;

const RETEST_TIMEOUT: Duration = Duration::from_secs(30);
const EXPLOIT_GUEST_PATH: &str = "/workspace/exploit.ts";

/// Why a unified diff could not be applied.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchApplyError {
    #[error("no hunks in diff")]
    NoHunks,

    #[error("malformed hunk header: {0}")]
    MalformedHunk(String),

    #[error("hunk context does not match source at line {line}")]
    ContextMismatch { line: usize },

    #[error("hunk extends past end of source")]
    OutOfBounds,
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_lines: Vec<String>,
    new_lines: Vec<String>,
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, PatchApplyError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("@@ -") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            // Header shape: `@@ -N[,len] +M[,len] @@`
            let old_part = rest
                .split(|c| c == ',' || c == ' ')
                .next()
                .ok_or_else(|| PatchApplyError::MalformedHunk(line.to_string()))?;
            let old_start: usize = old_part
                .parse()
                .map_err(|_| PatchApplyError::MalformedHunk(line.to_string()))?;
            if old_start == 0 {
                return Err(PatchApplyError::MalformedHunk(line.to_string()));
            }
            current = Some(Hunk {
                old_start,
                old_lines: Vec::new(),
                new_lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            continue;
        };
        if let Some(body) = line.strip_prefix('-') {
            hunk.old_lines.push(body.to_string());
        } else if let Some(body) = line.strip_prefix('+') {
            hunk.new_lines.push(body.to_string());
        } else if let Some(body) = line.strip_prefix(' ') {
            hunk.old_lines.push(body.to_string());
            hunk.new_lines.push(body.to_string());
        } else if line.is_empty() {
            // Blank context line with the leading space trimmed by transport.
            hunk.old_lines.push(String::new());
            hunk.new_lines.push(String::new());
        }
    }
    if let Some(h) = current.take() {
        hunks.push(h);
    }
    if hunks.is_empty() {
        return Err(PatchApplyError::NoHunks);
    }
    Ok(hunks)
}

/// Apply a unified diff to `source`, verifying every context and removal
/// line. No fuzz: any mismatch refuses the whole patch.
pub fn apply_unified_diff(source: &str, diff: &str) -> Result<String, PatchApplyError> {
    let hunks = parse_hunks(diff)?;
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let mut offset: isize = 0;

    for hunk in hunks {
        let start = hunk.old_start as isize - 1 + offset;
        if start < 0 {
            return Err(PatchApplyError::OutOfBounds);
        }
        let start = start as usize;
        let end = start + hunk.old_lines.len();
        if end > lines.len() {
            return Err(PatchApplyError::OutOfBounds);
        }

        for (i, expected) in hunk.old_lines.iter().enumerate() {
            if &lines[start + i] != expected {
                return Err(PatchApplyError::ContextMismatch {
                    line: start + i + 1,
                });
            }
        }

        let new_len = hunk.new_lines.len() as isize;
        let old_len = hunk.old_lines.len() as isize;
        lines.splice(start..end, hunk.new_lines);
        offset += new_len - old_len;
    }

    let mut patched = lines.join("\n");
    if source.ends_with('\n') {
        patched.push('\n');
    }
    Ok(patched)
}

#[derive(Debug, Deserialize)]
struct PatchWire {
    #[serde(default)]
    file: Option<String>,
    unified_diff: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    test_code: Option<String>,
    #[serde(default)]
    breaking_changes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewIssueWire {
    severity: crate::domain::patch::IssueSeverity,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReviewWire {
    approved: bool,
    #[serde(default)]
    issues: Vec<ReviewIssueWire>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Configuration for one patch pass.
pub struct PatchPipeline {
    reasoner: Option<Arc<dyn Reasoner>>,
    supervisor: SandboxSupervisor,
    profile: SandboxProfile,
    max_concurrent: usize,
    skip_review: bool,
}

impl PatchPipeline {
    pub fn new(reasoner: Option<Arc<dyn Reasoner>>) -> Self {
        Self {
            reasoner,
            supervisor: SandboxSupervisor::new(),
            profile: SandboxProfile::Generic,
            max_concurrent: DEFAULT_PATCH_CONCURRENCY,
            skip_review: false,
        }
    }

    pub fn with_profile(mut self, profile: SandboxProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn skip_review(mut self, skip: bool) -> Self {
        self.skip_review = skip;
        self
    }

    /// Patch every eligible adversarial result. Output order follows input
    /// order; individual failures degrade to `no_patch`.
    pub async fn run(&self, results: &[AdversarialResult]) -> Vec<PatchResult> {
        let sem = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(results.len());

        for result in results.iter().cloned() {
            // Acquiring here pins patch start order to verdict order.
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .expect("patch semaphore closed");
            let reasoner = self.reasoner.clone();
            let supervisor = self.supervisor.clone();
            let profile = self.profile;
            let skip_review = self.skip_review;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                patch_one(result, reasoner, supervisor, profile, skip_review).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(outcome) = handle.await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

async fn patch_one(
    result: AdversarialResult,
    reasoner: Option<Arc<dyn Reasoner>>,
    supervisor: SandboxSupervisor,
    profile: SandboxProfile,
    skip_review: bool,
) -> PatchResult {
    let finding = &result.finding;
    let eligible = result
        .judge
        .as_ref()
        .map(|j| matches!(j.verdict, Verdict::Confirmed | Verdict::Likely))
        .unwrap_or(false);
    if !eligible {
        return PatchResult::skipped(&finding.id);
    }

    let Some(reasoner) = reasoner else {
        return PatchResult::no_patch(&finding.id);
    };

    let source = match std::fs::read_to_string(&finding.file) {
        Ok(s) => s,
        Err(e) => {
            warn!(finding = %finding.id, error = %e, "source unreadable; no patch");
            return PatchResult::no_patch(&finding.id);
        }
    };

    let Some(proposal) = generate_proposal(finding, &source, reasoner.as_ref()).await else {
        return PatchResult::no_patch(&finding.id);
    };
    if proposal.is_empty() {
        return PatchResult::no_patch(&finding.id);
    }

    // Strict application; failure is a rejection, never a partial write.
    let applied = apply_unified_diff(&source, &proposal.unified_diff);
    let (applied_ok, patched_source, apply_issue) = match applied {
        Ok(patched) => (true, Some(patched), None),
        Err(e) => (
            false,
            None,
            Some(ReviewIssue::error(format!("patch does not apply: {e}"))),
        ),
    };

    let mut review = if skip_review {
        PatchReview {
            approved: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
            exploit_retest_passed: None,
            regression_check_passed: None,
        }
    } else {
        review_proposal(finding, &proposal, &source, reasoner.as_ref()).await
    };

    if let Some(issue) = apply_issue {
        review.approved = false;
        review.issues.push(issue);
    }

    // Re-exploit against the patched source when we have both an exploit and
    // a sandbox.
    let exploit_code = result
        .red_team
        .as_ref()
        .and_then(|r| r.exploit_code.clone());
    if let (Some(code), Some(patched)) = (exploit_code, patched_source.as_deref()) {
        match retest_exploit(&supervisor, profile, finding, patched, &code).await {
            Some(passed) => {
                review.exploit_retest_passed = Some(passed);
                if !passed && review.approved {
                    review.approved = false;
                    review.issues.push(ReviewIssue::error(
                        "exploit still succeeds against patched source",
                    ));
                }
            }
            None => {
                review.exploit_retest_passed = None;
                if review.approved {
                    review.issues.push(ReviewIssue::warning(
                        "sandbox unavailable; exploit not retested",
                    ));
                }
            }
        }
    }

    let status = if !applied_ok || !review.approved {
        PatchStatus::PatchRejected
    } else if skip_review {
        PatchStatus::PatchedNeedsReview
    } else {
        PatchStatus::PatchedAndVerified
    };

    PatchResult {
        finding_id: finding.id.clone(),
        status,
        proposal: Some(proposal),
        review: Some(review),
    }
}

async fn generate_proposal(
    finding: &crate::domain::finding::Finding,
    source: &str,
    reasoner: &dyn Reasoner,
) -> Option<PatchProposal> {
    let request = ReasonerRequest {
        system: "You are a security patch author. Respond with a single JSON object: \
                 {file, unified_diff, explanation, root_cause, test_code?, breaking_changes}. \
                 unified_diff must be a standard unified diff against the given source."
            .to_string(),
        prompt: format!(
            "Finding: {}\nClass: {}\nFile: {} line {}\n\nSource:\n{}",
            finding.title,
            finding.vuln_class,
            finding.file.display(),
            finding.line,
            source,
        ),
    };

    match reasoner.complete(&request).await {
        Ok(text) => match parse_response::<PatchWire>(&text) {
            Ok(wire) => Some(PatchProposal {
                finding_id: finding.id.clone(),
                file: wire
                    .file
                    .unwrap_or_else(|| finding.file.to_string_lossy().into_owned()),
                unified_diff: wire.unified_diff,
                explanation: wire.explanation,
                root_cause: wire.root_cause,
                test_code: wire.test_code,
                breaking_changes: wire.breaking_changes,
            }),
            Err(e) => {
                debug!(finding = %finding.id, error = %e, "patch output unparseable");
                None
            }
        },
        Err(e) => {
            warn!(finding = %finding.id, error = %e, "patch agent failed");
            None
        }
    }
}

async fn review_proposal(
    finding: &crate::domain::finding::Finding,
    proposal: &PatchProposal,
    source: &str,
    reasoner: &dyn Reasoner,
) -> PatchReview {
    let request = ReasonerRequest {
        system: "You are a patch reviewer. Respond with a single JSON object: \
                 {approved, issues: [{severity, message}], suggestions}. severity is one \
                 of error|warning|info."
            .to_string(),
        prompt: format!(
            "Finding: {}\nProposed diff:\n{}\nExplanation: {}\n\nOriginal source:\n{}",
            finding.title, proposal.unified_diff, proposal.explanation, source,
        ),
    };

    let parsed = match reasoner.complete(&request).await {
        Ok(text) => parse_response::<ReviewWire>(&text),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(wire) => PatchReview {
            approved: wire.approved,
            issues: wire
                .issues
                .into_iter()
                .map(|i| ReviewIssue {
                    severity: i.severity,
                    message: i.message,
                })
                .collect(),
            suggestions: wire.suggestions,
            exploit_retest_passed: None,
            regression_check_passed: None,
        },
        Err(e) => {
            debug!(finding = %finding.id, error = %e, "review unparseable; not approved");
            PatchReview {
                approved: false,
                issues: vec![ReviewIssue::error(format!(
                    "review output unparseable: {e}"
                ))],
                suggestions: Vec::new(),
                exploit_retest_passed: None,
                regression_check_passed: None,
            }
        }
    }
}

/// Run the exploit against the patched source. `Some(true)` means the
/// exploit no longer succeeds; `None` means the retest could not run.
async fn retest_exploit(
    supervisor: &SandboxSupervisor,
    profile: SandboxProfile,
    finding: &crate::domain::finding::Finding,
    patched_source: &str,
    exploit_code: &str,
) -> Option<bool> {
    if !supervisor.is_runtime_available().await || !supervisor.is_image_built(profile).await {
        return None;
    }

    let session = match supervisor.create(profile, None).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "sandbox create failed; retest skipped");
            return None;
        }
    };

    let file_name = finding
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "patched.rs".to_string());
    let guest_source = format!("/workspace/{file_name}");

    let outcome = async {
        session
            .write_file(&guest_source, patched_source.as_bytes())
            .await?;
        session
            .write_file(EXPLOIT_GUEST_PATH, exploit_code.as_bytes())
            .await?;
        session
            .exec(&["tsx", EXPLOIT_GUEST_PATH], Some(RETEST_TIMEOUT))
            .await
    }
    .await;

    let _ = session.destroy().await;

    match outcome {
        // Exit code != 0 means the exploit failed against the patch.
        Ok(result) => Some(result.exit_code != 0),
        Err(e) => {
            warn!(error = %e, "retest execution failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::adversarial::{JudgeVerdict, RedTeamAssessment};
    use crate::domain::finding::{Finding, Severity, VulnClass};
    use crate::reasoner::ScriptedReasoner;

    const SOURCE: &str = "fn withdraw() {\n    let amount = 10;\n    transfer(amount);\n}\n";

    #[test]
    fn apply_simple_replacement() {
        let diff = "@@ -2,1 +2,1 @@\n-    let amount = 10;\n+    let amount = checked(10);\n";
        let patched = apply_unified_diff(SOURCE, diff).unwrap();
        assert!(patched.contains("checked(10)"));
        assert!(!patched.contains("= 10;"));
        assert!(patched.ends_with('\n'));
    }

    #[test]
    fn apply_verifies_context_lines() {
        let diff = "@@ -1,3 +1,3 @@\n fn withdraw() {\n-    let amount = 10;\n+    let amount = 0;\n     transfer(amount);\n";
        let patched = apply_unified_diff(SOURCE, diff).unwrap();
        assert!(patched.contains("= 0;"));
        assert!(patched.contains("transfer(amount);"));
    }

    #[test]
    fn apply_refuses_on_context_mismatch() {
        let diff = "@@ -2,1 +2,1 @@\n-    let amount = 999;\n+    let amount = 0;\n";
        let err = apply_unified_diff(SOURCE, diff).unwrap_err();
        assert_eq!(err, PatchApplyError::ContextMismatch { line: 2 });
    }

    #[test]
    fn apply_refuses_out_of_bounds_hunk() {
        let diff = "@@ -40,1 +40,1 @@\n-nothing here\n+still nothing\n";
        assert_eq!(
            apply_unified_diff(SOURCE, diff).unwrap_err(),
            PatchApplyError::OutOfBounds
        );
    }

    #[test]
    fn apply_tracks_offset_across_hunks() {
        let source = "a\nb\nc\nd\ne\n";
        let diff = "@@ -1,1 +1,2 @@\n-a\n+a1\n+a2\n@@ -4,1 +5,1 @@\n-d\n+d1\n";
        let patched = apply_unified_diff(source, diff).unwrap();
        assert_eq!(patched, "a1\na2\nb\nc\nd1\ne\n");
    }

    #[test]
    fn apply_rejects_diff_without_hunks() {
        assert_eq!(
            apply_unified_diff(SOURCE, "no hunks").unwrap_err(),
            PatchApplyError::NoHunks
        );
    }

    fn adversarial(verdict: Verdict, file: &std::path::Path) -> AdversarialResult {
        let finding = Finding::new(
            "account-validation",
            VulnClass::IntegerOverflow,
            Severity::High,
            85,
            file,
            2,
            "Unchecked arithmetic",
            "",
            "",
        );
        AdversarialResult {
            judge: Some(JudgeVerdict {
                verdict,
                final_severity: Severity::High,
                final_confidence: 85,
                reasoning: String::new(),
                evidence_summary: String::new(),
            }),
            red_team: Some(RedTeamAssessment::fallback("n/a")),
            blue_team: None,
            finding,
        }
    }

    fn write_source(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("vault.rs");
        std::fs::write(&path, SOURCE).unwrap();
        path
    }

    #[tokio::test]
    async fn disputed_verdicts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir);
        let pipeline = PatchPipeline::new(None);
        let out = pipeline.run(&[adversarial(Verdict::Disputed, &path)]).await;
        assert_eq!(out[0].status, PatchStatus::Skipped);
    }

    #[tokio::test]
    async fn no_reasoner_means_no_patch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir);
        let pipeline = PatchPipeline::new(None);
        let out = pipeline.run(&[adversarial(Verdict::Confirmed, &path)]).await;
        assert_eq!(out[0].status, PatchStatus::NoPatch);
    }

    #[tokio::test]
    async fn empty_diff_means_no_patch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "{\"unified_diff\": \"\", \"explanation\": \"nothing\", \"root_cause\": \"\"}"
                .to_string(),
        ]));
        let pipeline = PatchPipeline::new(Some(reasoner));
        let out = pipeline.run(&[adversarial(Verdict::Likely, &path)]).await;
        assert_eq!(out[0].status, PatchStatus::NoPatch);
    }

    #[tokio::test]
    async fn unmatched_context_rejects_even_when_review_approves() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "{\"unified_diff\": \"@@ -2,1 +2,1 @@\\n-    let amount = 999;\\n+    let amount = 0;\\n\", \
             \"explanation\": \"cap amount\", \"root_cause\": \"unchecked input\"}"
                .to_string(),
            "{\"approved\": true, \"issues\": [], \"suggestions\": []}".to_string(),
        ]));
        let pipeline = PatchPipeline::new(Some(reasoner));
        let out = pipeline.run(&[adversarial(Verdict::Likely, &path)]).await;

        assert_eq!(out[0].status, PatchStatus::PatchRejected);
        let review = out[0].review.as_ref().unwrap();
        assert!(!review.approved);
        assert!(review.issues.iter().any(|i| {
            i.severity == crate::domain::patch::IssueSeverity::Error
                && i.message.contains("does not apply")
        }));
    }

    #[tokio::test]
    async fn approved_and_applied_is_verified() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "{\"unified_diff\": \"@@ -2,1 +2,1 @@\\n-    let amount = 10;\\n+    let amount = checked(10);\\n\", \
             \"explanation\": \"checked math\", \"root_cause\": \"overflow\"}"
                .to_string(),
            "{\"approved\": true, \"issues\": [], \"suggestions\": []}".to_string(),
        ]));
        let pipeline = PatchPipeline::new(Some(reasoner));
        let out = pipeline.run(&[adversarial(Verdict::Confirmed, &path)]).await;

        assert_eq!(out[0].status, PatchStatus::PatchedAndVerified);
        assert!(out[0].proposal.as_ref().unwrap().unified_diff.contains("checked"));
    }

    #[tokio::test]
    async fn skip_review_yields_needs_review() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "{\"unified_diff\": \"@@ -2,1 +2,1 @@\\n-    let amount = 10;\\n+    let amount = checked(10);\\n\", \
             \"explanation\": \"\", \"root_cause\": \"\"}"
                .to_string(),
        ]));
        let pipeline = PatchPipeline::new(Some(reasoner)).skip_review(true);
        let out = pipeline.run(&[adversarial(Verdict::Confirmed, &path)]).await;
        assert_eq!(out[0].status, PatchStatus::PatchedNeedsReview);
    }

    #[tokio::test]
    async fn reviewer_rejection_sticks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(&dir);
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "{\"unified_diff\": \"@@ -2,1 +2,1 @@\\n-    let amount = 10;\\n+    let amount = checked(10);\\n\", \
             \"explanation\": \"\", \"root_cause\": \"\"}"
                .to_string(),
            "{\"approved\": false, \"issues\": [{\"severity\": \"error\", \
             \"message\": \"breaks the public api\"}], \"suggestions\": []}"
                .to_string(),
        ]));
        let pipeline = PatchPipeline::new(Some(reasoner));
        let out = pipeline.run(&[adversarial(Verdict::Confirmed, &path)]).await;
        assert_eq!(out[0].status, PatchStatus::PatchRejected);
    }
}
