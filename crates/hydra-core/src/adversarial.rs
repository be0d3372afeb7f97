//! Adversarial validation: per-finding red/blue/judge debates.
//!
//! A second-stage filter that reduces single-scanner false positives. Each
//! eligible finding goes through a strict sequence: the red team argues
//! exploitability (optionally backing it with a sandboxed exploit run), the
//! blue team argues mitigation, and the judge arbitrates with a typed
//! verdict. Debates across findings run with bounded concurrency; a failure
//! in any role yields a partial result, never an aborted pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::adversarial::{
    infer_verdict, AdversarialResult, BlueRecommendation, BlueTeamAssessment, JudgeVerdict,
    RedTeamAssessment, Verdict,
};
use crate::domain::finding::{Finding, Severity};
use crate::reasoner::{parse_response, Reasoner, ReasonerError, ReasonerRequest};
use crate::sandbox::{SandboxProfile, SandboxSupervisor};

/// Findings below this confidence skip the debate entirely.
pub const MIN_ADVERSARIAL_CONFIDENCE: u8 = 50;

/// Default bound on simultaneous debates.
pub const DEFAULT_DEBATE_CONCURRENCY: usize = 2;

const EXPLOIT_TIMEOUT: Duration = Duration::from_secs(25);
const EXPLOIT_GUEST_PATH: &str = "/workspace/exploit.ts";
const MAX_SOURCE_CHARS: usize = 24_000;
const MAX_RECORDED_STDOUT: usize = 4_096;

#[derive(Debug, Deserialize)]
struct RedWire {
    exploitable: bool,
    #[serde(default)]
    exploit_code: Option<String>,
    #[serde(default)]
    attack_steps: Vec<String>,
    #[serde(default)]
    economic_impact: Option<String>,
    confidence: u8,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlueWire {
    #[serde(default)]
    existing_mitigations: Vec<String>,
    reachable: bool,
    #[serde(default)]
    reachability_reasoning: String,
    #[serde(default)]
    env_protections: Vec<String>,
    economically_feasible: bool,
    overall_risk_reduction: u8,
    recommendation: BlueRecommendation,
}

#[derive(Debug, Deserialize)]
struct JudgeWire {
    verdict: Verdict,
    final_severity: Severity,
    final_confidence: u8,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    evidence_summary: String,
}

/// Configuration for one adversarial pass.
pub struct AdversarialPipeline {
    reasoner: Option<Arc<dyn Reasoner>>,
    supervisor: SandboxSupervisor,
    profile: SandboxProfile,
    min_confidence: u8,
    max_concurrent: usize,
}

impl AdversarialPipeline {
    pub fn new(reasoner: Option<Arc<dyn Reasoner>>) -> Self {
        Self {
            reasoner,
            supervisor: SandboxSupervisor::new(),
            profile: SandboxProfile::Generic,
            min_confidence: MIN_ADVERSARIAL_CONFIDENCE,
            max_concurrent: DEFAULT_DEBATE_CONCURRENCY,
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

    pub fn with_min_confidence(mut self, min_confidence: u8) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Debate every eligible finding. Output order follows input order.
    pub async fn run(&self, findings: &[Finding]) -> Vec<AdversarialResult> {
        let eligible: Vec<Finding> = findings
            .iter()
            .filter(|f| f.confidence >= self.min_confidence)
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        let sem = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(eligible.len());

        for finding in eligible {
            // Acquiring here pins debate start order to finding order.
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .expect("debate semaphore closed");
            let reasoner = self.reasoner.clone();
            let supervisor = self.supervisor.clone();
            let profile = self.profile;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                debate(finding, reasoner, supervisor, profile).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(result) = handle.await {
                results.push(result);
            }
        }
        results
    }
}

/// One strict red -> blue -> judge sequence.
async fn debate(
    finding: Finding,
    reasoner: Option<Arc<dyn Reasoner>>,
    supervisor: SandboxSupervisor,
    profile: SandboxProfile,
) -> AdversarialResult {
    let source = read_source(&finding);

    let red = run_red(&finding, &source, reasoner.as_deref()).await;
    let red = match red {
        Some(mut assessment) => {
            if assessment.exploit_code.is_some() {
                attach_sandbox_evidence(&mut assessment, &supervisor, profile).await;
            }
            Some(assessment)
        }
        None => None,
    };

    let blue = run_blue(&finding, red.as_ref(), reasoner.as_deref()).await;
    let judge = run_judge(&finding, red.as_ref(), blue.as_ref(), reasoner.as_deref()).await;

    AdversarialResult {
        finding,
        red_team: red,
        blue_team: blue,
        judge: Some(judge),
    }
}

fn read_source(finding: &Finding) -> String {
    match std::fs::read_to_string(&finding.file) {
        Ok(mut contents) => {
            contents.truncate(
                contents
                    .char_indices()
                    .nth(MAX_SOURCE_CHARS)
                    .map(|(i, _)| i)
                    .unwrap_or(contents.len()),
            );
            contents
        }
        Err(_) => String::new(),
    }
}

async fn run_red(
    finding: &Finding,
    source: &str,
    reasoner: Option<&dyn Reasoner>,
) -> Option<RedTeamAssessment> {
    let Some(reasoner) = reasoner else {
        return Some(RedTeamAssessment::fallback("no reasoner configured"));
    };

    let request = ReasonerRequest {
        system: "You are a red-team security researcher. Respond with a single JSON object: \
                 {exploitable, exploit_code?, attack_steps, economic_impact?, confidence, reason}."
            .to_string(),
        prompt: format!(
            "Finding: {}\nClass: {}\nFile: {} line {}\nEvidence: {}\n\nSource:\n{}",
            finding.title,
            finding.vuln_class,
            finding.file.display(),
            finding.line,
            finding.evidence,
            source,
        ),
    };

    match reasoner.complete(&request).await {
        Ok(text) => match parse_response::<RedWire>(&text) {
            Ok(wire) => Some(RedTeamAssessment {
                exploitable: wire.exploitable,
                exploit_code: wire.exploit_code,
                attack_steps: wire.attack_steps,
                economic_impact: wire.economic_impact,
                confidence: wire.confidence.min(100),
                reason: wire.reason,
                sandbox_executed: false,
                sandbox_exit_code: None,
                sandbox_stdout: None,
            }),
            Err(e) => {
                debug!(finding = %finding.id, error = %e, "red-team parse fallback");
                Some(RedTeamAssessment::fallback(format!(
                    "red-team output unparseable: {e}"
                )))
            }
        },
        Err(e) => {
            warn!(finding = %finding.id, error = %e, "red-team role failed");
            None
        }
    }
}

/// Probe the supervisor and, when possible, execute the exploit in a fresh
/// session. Evidence is only ever recorded from a real execution.
async fn attach_sandbox_evidence(
    red: &mut RedTeamAssessment,
    supervisor: &SandboxSupervisor,
    profile: SandboxProfile,
) {
    if !supervisor.is_runtime_available().await || !supervisor.is_image_built(profile).await {
        return;
    }
    let Some(code) = red.exploit_code.clone() else {
        return;
    };

    let session = match supervisor.create(profile, None).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "sandbox create failed; red-team evidence degraded");
            return;
        }
    };

    let outcome = async {
        session.write_file(EXPLOIT_GUEST_PATH, code.as_bytes()).await?;
        session
            .exec(&["tsx", EXPLOIT_GUEST_PATH], Some(EXPLOIT_TIMEOUT))
            .await
    }
    .await;

    // Teardown on every path.
    let _ = session.destroy().await;

    match outcome {
        Ok(result) => {
            red.sandbox_executed = true;
            red.sandbox_exit_code = Some(result.exit_code);
            let mut stdout = result.stdout;
            stdout.truncate(
                stdout
                    .char_indices()
                    .nth(MAX_RECORDED_STDOUT)
                    .map(|(i, _)| i)
                    .unwrap_or(stdout.len()),
            );
            red.sandbox_stdout = Some(stdout);
        }
        Err(e) => {
            warn!(error = %e, "exploit execution failed; evidence not recorded");
        }
    }
}

async fn run_blue(
    finding: &Finding,
    red: Option<&RedTeamAssessment>,
    reasoner: Option<&dyn Reasoner>,
) -> Option<BlueTeamAssessment> {
    let Some(reasoner) = reasoner else {
        return Some(BlueTeamAssessment::fallback("no reasoner configured"));
    };

    let red_summary = red
        .map(|r| serde_json::to_string(r).unwrap_or_default())
        .unwrap_or_else(|| "red team unavailable".to_string());

    let request = ReasonerRequest {
        system: "You are a blue-team defender. Respond with a single JSON object: \
                 {existing_mitigations, reachable, reachability_reasoning, env_protections, \
                 economically_feasible, overall_risk_reduction, recommendation}. \
                 recommendation is one of confirmed|mitigated|infeasible."
            .to_string(),
        prompt: format!(
            "Finding: {}\nClass: {}\nFile: {} line {}\nRed team assessment: {}",
            finding.title,
            finding.vuln_class,
            finding.file.display(),
            finding.line,
            red_summary,
        ),
    };

    match reasoner.complete(&request).await {
        Ok(text) => match parse_response::<BlueWire>(&text) {
            Ok(wire) => Some(BlueTeamAssessment {
                existing_mitigations: wire.existing_mitigations,
                reachable: wire.reachable,
                reachability_reasoning: wire.reachability_reasoning,
                env_protections: wire.env_protections,
                economically_feasible: wire.economically_feasible,
                overall_risk_reduction: wire.overall_risk_reduction.min(100),
                recommendation: wire.recommendation,
            }),
            Err(e) => {
                debug!(finding = %finding.id, error = %e, "blue-team parse fallback");
                Some(BlueTeamAssessment::fallback(format!(
                    "blue-team output unparseable: {e}"
                )))
            }
        },
        Err(e) => {
            warn!(finding = %finding.id, error = %e, "blue-team role failed");
            None
        }
    }
}

async fn run_judge(
    finding: &Finding,
    red: Option<&RedTeamAssessment>,
    blue: Option<&BlueTeamAssessment>,
    reasoner: Option<&dyn Reasoner>,
) -> JudgeVerdict {
    let Some(reasoner) = reasoner else {
        return infer_verdict(finding, red, blue);
    };

    let request = ReasonerRequest {
        system: "You are an impartial security judge. Respond with a single JSON object: \
                 {verdict, final_severity, final_confidence, reasoning, evidence_summary}. \
                 verdict is one of confirmed|likely|disputed|false_positive; final_severity \
                 is one of CRITICAL|HIGH|MEDIUM|LOW."
            .to_string(),
        prompt: format!(
            "Finding: {}\nRed: {}\nBlue: {}",
            serde_json::to_string(finding).unwrap_or_default(),
            red.and_then(|r| serde_json::to_string(r).ok())
                .unwrap_or_else(|| "unavailable".to_string()),
            blue.and_then(|b| serde_json::to_string(b).ok())
                .unwrap_or_else(|| "unavailable".to_string()),
        ),
    };

    let parsed: Result<JudgeWire, ReasonerError> = match reasoner.complete(&request).await {
        Ok(text) => parse_response(&text),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(wire) => JudgeVerdict {
            verdict: wire.verdict,
            final_severity: wire.final_severity,
            final_confidence: wire.final_confidence.min(100),
            reasoning: wire.reasoning,
            evidence_summary: wire.evidence_summary,
        },
        Err(e) => {
            debug!(finding = %finding.id, error = %e, "judge fallback to inference rule");
            infer_verdict(finding, red, blue)
        }
    }
}

/// Keep only findings the judge confirmed or called likely, with severity
/// and confidence replaced by the judge's values.
pub fn filter_by_verdict(results: &[AdversarialResult]) -> Vec<Finding> {
    results
        .iter()
        .filter_map(|r| {
            let judge = r.judge.as_ref()?;
            if matches!(judge.verdict, Verdict::Confirmed | Verdict::Likely) {
                let mut finding = r.finding.clone();
                finding.severity = judge.final_severity;
                finding.confidence = judge.final_confidence;
                Some(finding)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::VulnClass;
    use crate::reasoner::ScriptedReasoner;

    fn finding(confidence: u8) -> Finding {
        Finding::new(
            "account-validation",
            VulnClass::MissingSignerCheck,
            Severity::High,
            confidence,
            "/nonexistent/src/lib.rs",
            10,
            "Missing signer check",
            "authority never verified",
            "pub authority: AccountInfo<'info>,",
        )
    }

    fn red_json(exploitable: bool, confidence: u8) -> String {
        format!(
            "{{\"exploitable\": {exploitable}, \"attack_steps\": [\"call withdraw\"], \
             \"confidence\": {confidence}, \"reason\": \"unchecked authority\"}}"
        )
    }

    fn blue_json(recommendation: &str) -> String {
        format!(
            "{{\"existing_mitigations\": [], \"reachable\": true, \
             \"reachability_reasoning\": \"public instruction\", \"env_protections\": [], \
             \"economically_feasible\": true, \"overall_risk_reduction\": 10, \
             \"recommendation\": \"{recommendation}\"}}"
        )
    }

    #[tokio::test]
    async fn gate_skips_low_confidence_findings() {
        let pipeline = AdversarialPipeline::new(None);
        let results = pipeline.run(&[finding(49)]).await;
        assert!(results.is_empty());

        let results = pipeline.run(&[finding(50)]).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn no_reasoner_yields_conservative_complete_result() {
        let pipeline = AdversarialPipeline::new(None);
        let results = pipeline.run(&[finding(85)]).await;

        let r = &results[0];
        let red = r.red_team.as_ref().unwrap();
        assert!(!red.exploitable);
        assert!(!red.sandbox_executed);
        let blue = r.blue_team.as_ref().unwrap();
        assert_eq!(blue.recommendation, BlueRecommendation::Confirmed);
        // Deterministic rule bottoms out at likely.
        assert_eq!(r.judge.as_ref().unwrap().verdict, Verdict::Likely);
    }

    #[tokio::test]
    async fn judge_unavailable_uses_inference_rule() {
        // Scenario: red exploitable at 85, blue recommends confirmed, judge
        // reasoner exhausted -> likely.
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            red_json(true, 85),
            blue_json("confirmed"),
        ]));
        let pipeline = AdversarialPipeline::new(Some(reasoner));
        let results = pipeline.run(&[finding(85)]).await;

        let r = &results[0];
        assert!(r.red_team.as_ref().unwrap().exploitable);
        assert_eq!(r.judge.as_ref().unwrap().verdict, Verdict::Likely);
    }

    #[tokio::test]
    async fn parse_failure_degrades_to_fallback_assessments() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            "not json at all".to_string(),
            "also not json".to_string(),
            "still not json".to_string(),
        ]));
        let pipeline = AdversarialPipeline::new(Some(reasoner));
        let results = pipeline.run(&[finding(85)]).await;

        let r = &results[0];
        let red = r.red_team.as_ref().unwrap();
        assert!(!red.exploitable);
        assert!(red.reason.as_ref().unwrap().contains("unparseable"));
        let blue = r.blue_team.as_ref().unwrap();
        assert_eq!(blue.recommendation, BlueRecommendation::Confirmed);
        assert!(r.judge.is_some());
    }

    #[tokio::test]
    async fn judge_verdict_parsed_when_available() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            red_json(true, 90),
            blue_json("mitigated"),
            "{\"verdict\": \"disputed\", \"final_severity\": \"MEDIUM\", \
             \"final_confidence\": 40, \"reasoning\": \"mitigated upstream\", \
             \"evidence_summary\": \"guard exists\"}"
                .to_string(),
        ]));
        let pipeline = AdversarialPipeline::new(Some(reasoner));
        let results = pipeline.run(&[finding(85)]).await;

        let judge = results[0].judge.as_ref().unwrap();
        assert_eq!(judge.verdict, Verdict::Disputed);
        assert_eq!(judge.final_severity, Severity::Medium);
        assert_eq!(judge.final_confidence, 40);
    }

    #[tokio::test]
    async fn filter_keeps_confirmed_and_likely_with_judge_values() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            red_json(true, 90),
            blue_json("confirmed"),
            "{\"verdict\": \"confirmed\", \"final_severity\": \"CRITICAL\", \
             \"final_confidence\": 97, \"reasoning\": \"\", \"evidence_summary\": \"\"}"
                .to_string(),
            red_json(false, 10),
            blue_json("infeasible"),
            "{\"verdict\": \"false_positive\", \"final_severity\": \"LOW\", \
             \"final_confidence\": 5, \"reasoning\": \"\", \"evidence_summary\": \"\"}"
                .to_string(),
        ]));
        // Concurrency 1 keeps the scripted role order aligned with findings.
        let pipeline = AdversarialPipeline::new(Some(reasoner)).with_concurrency(1);

        let mut second = finding(70);
        second.line = 99;
        second.id = Finding::compute_id(
            &second.scanner_id,
            second.vuln_class,
            &second.file,
            second.line,
        );
        let results = pipeline.run(&[finding(85), second]).await;

        let kept = filter_by_verdict(&results);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].severity, Severity::Critical);
        assert_eq!(kept[0].confidence, 97);
    }
}
