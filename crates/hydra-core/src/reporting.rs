//! Report rendering: JSON, Markdown, and SARIF 2.1.0.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;

use crate::domain::finding::Severity;
use crate::domain::report::ScanReport;

/// Write the scan report as pretty JSON.
pub fn write_report_json(path: &Path, report: &ScanReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize scan report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a Markdown summary for PR/comment/check output.
pub fn render_markdown(report: &ScanReport) -> String {
    let mut out = String::new();
    out.push_str("# Hydra Scan Report\n\n");
    out.push_str(&format!(
        "- target: `{}`\n- mode: {}\n- findings: {}\n- agents: {}\n\n",
        report.target.root_path.display(),
        report.target.mode,
        report.findings.len(),
        report.agent_runs.len(),
    ));

    if let Some(tm) = &report.threat_model {
        out.push_str("## Threat Model\n");
        out.push_str(&format!(
            "- version: `{}` (revision {})\n- primary language: {}\n- frameworks: {}\n\n",
            tm.version_id,
            tm.revision,
            tm.summary.primary_language,
            if tm.summary.detected_frameworks.is_empty() {
                "none detected".to_string()
            } else {
                tm.summary.detected_frameworks.join(", ")
            },
        ));
    }

    if report.findings.is_empty() {
        out.push_str("## Findings\n\nNo findings.\n");
    } else {
        out.push_str("## Findings\n\n");
        out.push_str("| Severity | Class | Location | Confidence | Scanners |\n");
        out.push_str("|----------|-------|----------|------------|----------|\n");
        for f in &report.findings {
            out.push_str(&format!(
                "| {} | {} | `{}:{}` | {} | {} |\n",
                f.severity,
                f.vuln_class,
                f.file.display(),
                f.line,
                f.confidence,
                f.scanner_id,
            ));
        }
        out.push('\n');
        for f in &report.findings {
            out.push_str(&format!("### {} ({})\n\n", f.title, f.id));
            out.push_str(&format!("{}\n\n", f.description));
            if !f.evidence.is_empty() {
                out.push_str(&format!("```\n{}\n```\n\n", f.evidence));
            }
        }
    }

    if let Some(results) = &report.adversarial_results {
        out.push_str("## Adversarial Verdicts\n\n");
        for r in results {
            if let Some(judge) = &r.judge {
                out.push_str(&format!(
                    "- `{}`: **{}** ({} at {})\n",
                    r.finding.id, judge.verdict, judge.final_severity, judge.final_confidence,
                ));
            }
        }
        out.push('\n');
    }

    if let Some(patches) = &report.patch_results {
        out.push_str("## Patches\n\n");
        for p in patches {
            out.push_str(&format!("- `{}`: {:?}\n", p.finding_id, p.status));
        }
        out.push('\n');
    }

    out
}

/// Write the Markdown rendering.
pub fn write_report_markdown(path: &Path, report: &ScanReport) -> Result<()> {
    std::fs::write(path, render_markdown(report)).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low => "note",
    }
}

/// Render a minimal SARIF 2.1.0 document.
pub fn render_sarif(report: &ScanReport) -> serde_json::Value {
    let mut rule_ids: Vec<String> = report
        .findings
        .iter()
        .map(|f| f.vuln_class.to_string())
        .collect();
    rule_ids.sort();
    rule_ids.dedup();

    let rules: Vec<_> = rule_ids
        .iter()
        .map(|id| json!({ "id": id, "name": id }))
        .collect();

    let results: Vec<_> = report
        .findings
        .iter()
        .map(|f| {
            json!({
                "ruleId": f.vuln_class.to_string(),
                "level": sarif_level(f.severity),
                "message": { "text": format!("{}: {}", f.title, f.description) },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": f.file.to_string_lossy() },
                        "region": { "startLine": f.line },
                    }
                }],
                "properties": {
                    "confidence": f.confidence,
                    "scanners": f.scanner_id,
                },
            })
        })
        .collect();

    json!({
        "$schema": "https://json.schemastore.org/sarif-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "hydra",
                    "version": crate::VERSION,
                    "rules": rules,
                }
            },
            "results": results,
        }]
    })
}

/// Write the SARIF rendering.
pub fn write_report_sarif(path: &Path, report: &ScanReport) -> Result<()> {
    let content =
        serde_json::to_string_pretty(&render_sarif(report)).context("serialize sarif")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::{Finding, VulnClass};
    use crate::domain::target::ScanTarget;
    use chrono::Utc;

    fn report() -> (tempfile::TempDir, ScanReport) {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let report = ScanReport {
            target: ScanTarget::full(dir.path()).unwrap(),
            threat_model: None,
            agent_runs: vec![],
            findings: vec![Finding::new(
                "account-validation + cpi-safety",
                VulnClass::MissingSignerCheck,
                Severity::High,
                88,
                "/repo/src/lib.rs",
                42,
                "Missing signer check (corroborated)",
                "authority never verified",
                "pub authority: AccountInfo<'info>,",
            )],
            adversarial_results: None,
            patch_results: None,
            started_at: now,
            completed_at: now,
            stage_timings: vec![],
        };
        (dir, report)
    }

    #[test]
    fn markdown_contains_findings_table() {
        let (_dir, report) = report();
        let md = render_markdown(&report);
        assert!(md.contains("| HIGH | missing_signer_check |"));
        assert!(md.contains("Missing signer check (corroborated)"));
    }

    #[test]
    fn markdown_handles_empty_report() {
        let (_dir, mut report) = report();
        report.findings.clear();
        let md = render_markdown(&report);
        assert!(md.contains("No findings."));
    }

    #[test]
    fn sarif_maps_severity_to_level() {
        let (_dir, report) = report();
        let sarif = render_sarif(&report);
        assert_eq!(sarif["version"], "2.1.0");
        let result = &sarif["runs"][0]["results"][0];
        assert_eq!(result["level"], "error");
        assert_eq!(result["ruleId"], "missing_signer_check");
        assert_eq!(
            result["locations"][0]["physicalLocation"]["region"]["startLine"],
            42
        );
    }

    #[test]
    fn sarif_rules_are_deduped() {
        let (_dir, mut report) = report();
        let mut second = report.findings[0].clone();
        second.line = 50;
        report.findings.push(second);
        let sarif = render_sarif(&report);
        assert_eq!(
            sarif["runs"][0]["tool"]["driver"]["rules"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }
}
