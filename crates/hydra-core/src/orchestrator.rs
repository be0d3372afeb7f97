//! Scan orchestration: scope resolution and the fixed stage pipeline.
//!
//! Stages run in a fixed order: resolve target, load-or-create the threat
//! model, dispatch scanners, aggregate, then the optional adversarial and
//! patch passes. `started_at`/`completed_at` bracket stages 3-6. A diff scan
//! with no eligible files short-circuits those stages and still emits a
//! well-formed report with its threat model attached.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::adversarial::{filter_by_verdict, AdversarialPipeline};
use crate::aggregator::FindingAggregator;
use crate::cache::ScanCache;
use crate::config::HydraConfig;
use crate::dispatcher::{AgentDispatcher, CancelToken};
use crate::domain::error::Result;
use crate::domain::report::{ScanReport, StageTiming};
use crate::domain::target::{ScanMode, ScanTarget};
use crate::git;
use crate::patcher::PatchPipeline;
use crate::reasoner::Reasoner;
use crate::scanner::AgentTask;
use crate::threat_model::ThreatModelStore;

/// Diff-scope inputs for `run_diff_scan`.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    /// Explicit changed files; when empty the set is derived from git.
    pub changed_files: Vec<PathBuf>,
}

/// Optional pipeline stages for one scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub adversarial: bool,
    pub patch: bool,
    pub skip_review: bool,
}

/// The orchestration engine: owns all in-flight per-scan state.
pub struct HydraOrchestrator {
    config: HydraConfig,
    tasks: Vec<Arc<dyn AgentTask>>,
    reasoner: Option<Arc<dyn Reasoner>>,
    cache: Option<Arc<ScanCache>>,
    cancel: Option<CancelToken>,
}

impl HydraOrchestrator {
    pub fn new(config: HydraConfig, tasks: Vec<Arc<dyn AgentTask>>) -> Self {
        Self {
            config,
            tasks,
            reasoner: None,
            cache: None,
            cancel: None,
        }
    }

    pub fn with_reasoner(mut self, reasoner: Option<Arc<dyn Reasoner>>) -> Self {
        self.reasoner = reasoner;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ScanCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Scan the whole tree under `root`.
    pub async fn run_full_scan(
        &self,
        root: impl AsRef<Path>,
        options: ScanOptions,
    ) -> Result<ScanReport> {
        let target = ScanTarget::full(root)?;
        self.run_pipeline(target, options).await
    }

    /// Scan only the changed-file set under `root`.
    pub async fn run_diff_scan(
        &self,
        root: impl AsRef<Path>,
        diff: DiffOptions,
        options: ScanOptions,
    ) -> Result<ScanReport> {
        let mut target = ScanTarget::diff(
            root,
            diff.base_ref.clone(),
            diff.head_ref.clone(),
            Vec::new(),
        )?;

        let changed = if !diff.changed_files.is_empty() {
            git::normalize_changed_files(&target.root_path, &diff.changed_files)
        } else if let Some(base) = &diff.base_ref {
            git::resolve_changed_files(&target.root_path, base, diff.head_ref.as_deref())
        } else {
            // No refs and no explicit list: untracked working-tree files only.
            git::resolve_changed_files(&target.root_path, "HEAD", None)
        };
        if let Some(spec) = target.diff.as_mut() {
            spec.changed_files = changed;
        }

        self.run_pipeline(target, options).await
    }

    async fn run_pipeline(&self, target: ScanTarget, options: ScanOptions) -> Result<ScanReport> {
        let mut timings: Vec<StageTiming> = Vec::new();

        // Stage 2: threat model. A storage failure degrades to a missing
        // snapshot; the next run reconstructs it from inputs.
        let stage = Instant::now();
        let threat_model = match ThreatModelStore::new(&target.root_path).load_or_create(&target) {
            Ok(loaded) => Some(loaded.version),
            Err(e) => {
                warn!(error = %e, "threat model unavailable for this run");
                None
            }
        };
        push_timing(&mut timings, "threat_model", stage);

        let started_at = Utc::now();

        // Empty diff scope: stages 3-6 are skipped outright.
        if target.mode == ScanMode::Diff && target.changed_files().is_empty() {
            info!(root = %target.root_path.display(), "diff scope empty; skipping scan stages");
            self.flush_cache();
            return Ok(ScanReport {
                target,
                threat_model,
                agent_runs: Vec::new(),
                findings: Vec::new(),
                adversarial_results: None,
                patch_results: None,
                started_at,
                completed_at: Utc::now(),
                stage_timings: timings,
            });
        }

        // Stage 3: dispatch.
        let stage = Instant::now();
        let dispatcher = AgentDispatcher::new(self.config.max_concurrent_agents)?;
        let outcome = dispatcher
            .dispatch(self.tasks.clone(), &target, self.cancel.clone())
            .await;
        push_timing(&mut timings, "dispatch", stage);

        // Stage 4: aggregate, scoped to the diff set in diff mode.
        let stage = Instant::now();
        let mut raw = outcome.findings;
        if target.mode == ScanMode::Diff {
            let scope: HashSet<&PathBuf> = target.changed_files().iter().collect();
            raw.retain(|f| scope.contains(&f.file));
        }
        let aggregator = FindingAggregator::new(self.config.min_uncorroborated_confidence);
        let mut findings = aggregator.aggregate(raw);
        push_timing(&mut timings, "aggregate", stage);

        // Stage 5: adversarial validation. Patching implies it.
        let run_adversarial = options.adversarial || options.patch;
        let adversarial_results = if run_adversarial && !findings.is_empty() {
            let stage = Instant::now();
            let pipeline = AdversarialPipeline::new(self.reasoner.clone())
                .with_profile(self.config.sandbox_profile)
                .with_concurrency(self.config.adversarial_concurrency)
                .with_min_confidence(self.config.min_adversarial_confidence);
            let results = pipeline.run(&findings).await;
            push_timing(&mut timings, "adversarial", stage);

            if options.adversarial {
                findings = filter_by_verdict(&results);
            }
            Some(results)
        } else {
            None
        };

        // Stage 6: patches for confirmed/likely verdicts.
        let patch_results = match (&adversarial_results, options.patch) {
            (Some(results), true) if !results.is_empty() => {
                let stage = Instant::now();
                let pipeline = PatchPipeline::new(self.reasoner.clone())
                    .with_profile(self.config.sandbox_profile)
                    .with_concurrency(self.config.patch_concurrency)
                    .skip_review(options.skip_review);
                let patches = pipeline.run(results).await;
                push_timing(&mut timings, "patch", stage);
                Some(patches)
            }
            _ => None,
        };

        let completed_at = Utc::now();
        self.flush_cache();

        info!(
            root = %target.root_path.display(),
            mode = %target.mode,
            findings = findings.len(),
            agents = outcome.agent_runs.len(),
            "scan completed"
        );

        Ok(ScanReport {
            target,
            threat_model,
            agent_runs: outcome.agent_runs,
            findings,
            adversarial_results,
            patch_results,
            started_at,
            completed_at,
            stage_timings: timings,
        })
    }

    fn flush_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.flush() {
                warn!(error = %e, "scan cache flush failed; next run recomputes");
            }
        }
    }
}

fn push_timing(timings: &mut Vec<StageTiming>, stage: &str, started: Instant) {
    timings.push(StageTiming {
        stage: stage.to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::domain::agent_run::AgentStatus;
    use crate::domain::finding::{Finding, Severity, VulnClass};

    struct StubTask {
        id: String,
        findings: Vec<(PathBuf, u32)>,
    }

    #[async_trait]
    impl AgentTask for StubTask {
        fn agent_id(&self) -> &str {
            &self.id
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(5)
        }

        async fn execute(&self, _target: &ScanTarget) -> anyhow::Result<Vec<Finding>> {
            Ok(self
                .findings
                .iter()
                .map(|(file, line)| {
                    Finding::new(
                        &self.id,
                        VulnClass::SqlInjection,
                        Severity::High,
                        85,
                        file.clone(),
                        *line,
                        "String-built SQL",
                        "",
                        "",
                    )
                })
                .collect())
        }
    }

    fn make_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn full_scan_runs_all_core_stages() {
        let repo = make_repo();
        let file = repo.path().canonicalize().unwrap().join("a.rs");
        let tasks: Vec<Arc<dyn AgentTask>> = vec![Arc::new(StubTask {
            id: "stub".to_string(),
            findings: vec![(file, 1)],
        })];

        let orchestrator = HydraOrchestrator::new(HydraConfig::default(), tasks);
        let report = orchestrator
            .run_full_scan(repo.path(), ScanOptions::default())
            .await
            .unwrap();

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.agent_runs.len(), 1);
        assert_eq!(report.agent_runs[0].status, AgentStatus::Completed);
        assert!(report.threat_model.is_some());
        assert!(report.started_at <= report.completed_at);
        assert!(report.stage_timings.iter().any(|t| t.stage == "dispatch"));
    }

    #[tokio::test]
    async fn empty_diff_scope_skips_scan_stages() {
        let repo = make_repo();
        let tasks: Vec<Arc<dyn AgentTask>> = vec![Arc::new(StubTask {
            id: "stub".to_string(),
            findings: vec![(repo.path().join("a.rs"), 1)],
        })];

        let orchestrator = HydraOrchestrator::new(HydraConfig::default(), tasks);
        // Not a git repo, no explicit files: the scope degrades to empty.
        let report = orchestrator
            .run_diff_scan(repo.path(), DiffOptions::default(), ScanOptions::default())
            .await
            .unwrap();

        assert!(report.agent_runs.is_empty());
        assert!(report.findings.is_empty());
        assert!(report.threat_model.is_some());
        assert!(report.started_at <= report.completed_at);
    }

    #[tokio::test]
    async fn diff_scan_filters_findings_to_changed_set() {
        let repo = make_repo();
        let root = repo.path().canonicalize().unwrap();
        let tasks: Vec<Arc<dyn AgentTask>> = vec![Arc::new(StubTask {
            id: "stub".to_string(),
            findings: vec![(root.join("a.rs"), 1), (root.join("b.rs"), 2)],
        })];

        let orchestrator = HydraOrchestrator::new(HydraConfig::default(), tasks);
        let report = orchestrator
            .run_diff_scan(
                repo.path(),
                DiffOptions {
                    base_ref: None,
                    head_ref: None,
                    changed_files: vec![PathBuf::from("a.rs")],
                },
                ScanOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.findings.len(), 1);
        assert!(report.findings[0].file.ends_with("a.rs"));
    }

    #[tokio::test]
    async fn head_without_base_is_rejected_at_ingress() {
        let repo = make_repo();
        let orchestrator = HydraOrchestrator::new(HydraConfig::default(), vec![]);
        let err = orchestrator
            .run_diff_scan(
                repo.path(),
                DiffOptions {
                    base_ref: None,
                    head_ref: Some("HEAD".to_string()),
                    changed_files: vec![],
                },
                ScanOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("head_ref requires base_ref"));
    }
}
