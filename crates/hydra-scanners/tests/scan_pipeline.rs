//! End-to-end scan pipeline tests over the built-in scanner set.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use hydra_core::cache::ScanCache;
use hydra_core::config::HydraConfig;
use hydra_core::domain::finding::{Severity, VulnClass};
use hydra_core::orchestrator::{DiffOptions, HydraOrchestrator, ScanOptions};
use hydra_scanners::build_task_set;

/// Drive the fixture repository through the real `git` binary, failing the
/// test loudly if the command does not succeed.
fn git(repo_dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .expect("git binary available for fixtures");
    assert!(
        output.status.success(),
        "fixture `git {}` exited with {}: {}",
        args.join(" "),
        output.status,
        String::from_utf8_lossy(&output.stderr),
    );
}

/// Initialise an empty fixture repository with committable identity.
fn init_repo(repo_dir: &Path) {
    git(repo_dir, &["init"]);
    git(repo_dir, &["config", "user.name", "hydra-fixture"]);
    git(repo_dir, &["config", "user.email", "fixture@hydra.test"]);
}

fn orchestrator(cache: Option<Arc<ScanCache>>) -> HydraOrchestrator {
    let config = HydraConfig::default();
    let tasks = build_task_set(&config, None, cache.clone());
    let mut orchestrator = HydraOrchestrator::new(config, tasks);
    if let Some(cache) = cache {
        orchestrator = orchestrator.with_cache(cache);
    }
    orchestrator
}

#[tokio::test]
async fn full_scan_finds_marker_at_exact_line() {
    let dir = tempfile::tempdir().unwrap();
    let mut contents = String::new();
    for i in 1..42 {
        contents.push_str(&format!("// filler line {i}\n"));
    }
    contents.push_str("// HYDRA_VULN:missing_signer_check\n");
    std::fs::write(dir.path().join("program.rs"), contents).unwrap();

    let report = orchestrator(None)
        .run_full_scan(dir.path(), ScanOptions::default())
        .await
        .unwrap();

    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.vuln_class, VulnClass::MissingSignerCheck);
    assert_eq!(finding.line, 42);
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.confidence, 88);
    assert!(finding.scanner_id.contains("account-validation"));
    assert!(finding.file.ends_with("program.rs"));

    // All four builtin agents ran to completion.
    assert_eq!(report.agent_runs.len(), 4);
    assert!(report
        .agent_runs
        .iter()
        .all(|r| r.status == hydra_core::domain::agent_run::AgentStatus::Completed));
}

#[tokio::test]
async fn diff_scan_with_no_changes_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    std::fs::write(dir.path().join("lib.rs"), "fn lib() {}\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "one"]);
    git(dir.path(), &["commit", "--allow-empty", "-m", "two"]);

    let report = orchestrator(None)
        .run_diff_scan(
            dir.path(),
            DiffOptions {
                base_ref: Some("HEAD~1".to_string()),
                head_ref: Some("HEAD".to_string()),
                changed_files: vec![],
            },
            ScanOptions::default(),
        )
        .await
        .unwrap();

    assert!(report.started_at <= report.completed_at);
    assert!(report.agent_runs.is_empty());
    assert!(report.findings.is_empty());
    assert!(report.threat_model.is_some());
}

#[tokio::test]
async fn diff_scan_scopes_findings_to_changed_files() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    std::fs::write(
        dir.path().join("old.rs"),
        "// HYDRA_VULN:arbitrary_cpi\n",
    )
    .unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "base"]);
    std::fs::write(
        dir.path().join("new.rs"),
        "// HYDRA_VULN:non_canonical_bump\n",
    )
    .unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "head"]);

    let report = orchestrator(None)
        .run_diff_scan(
            dir.path(),
            DiffOptions {
                base_ref: Some("HEAD~1".to_string()),
                head_ref: Some("HEAD".to_string()),
                changed_files: vec![],
            },
            ScanOptions::default(),
        )
        .await
        .unwrap();

    // Only the file changed between the refs is in scope.
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].vuln_class, VulnClass::NonCanonicalBump);
    assert!(report.findings[0].file.ends_with("new.rs"));
}

#[tokio::test]
async fn rescan_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("program.rs"),
        "// HYDRA_VULN:missing_signer_check\n",
    )
    .unwrap();

    let cache = Arc::new(ScanCache::open(dir.path()));
    let first = orchestrator(Some(Arc::clone(&cache)))
        .run_full_scan(dir.path(), ScanOptions::default())
        .await
        .unwrap();
    assert_eq!(first.findings.len(), 1);
    let misses_after_first = cache.stats().misses;
    assert!(misses_after_first > 0);

    let second = orchestrator(Some(Arc::clone(&cache)))
        .run_full_scan(dir.path(), ScanOptions::default())
        .await
        .unwrap();
    assert_eq!(second.findings.len(), 1);
    assert_eq!(second.findings[0].id, first.findings[0].id);
    assert!(cache.stats().hits > 0);
    assert_eq!(cache.stats().misses, misses_after_first);
}

#[tokio::test]
async fn rerun_yields_identical_finding_ids() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("a.rs"),
        "// HYDRA_VULN:integer_overflow\n// HYDRA_VULN:arbitrary_cpi\n",
    )
    .unwrap();

    let first = orchestrator(None)
        .run_full_scan(dir.path(), ScanOptions::default())
        .await
        .unwrap();
    let second = orchestrator(None)
        .run_full_scan(dir.path(), ScanOptions::default())
        .await
        .unwrap();

    let ids = |r: &hydra_core::domain::report::ScanReport| {
        let mut ids: Vec<String> = r.findings.iter().map(|f| f.id.clone()).collect();
        ids.sort();
        ids
    };
    assert_eq!(ids(&first), ids(&second));
    assert!(!first.findings.is_empty());
}
