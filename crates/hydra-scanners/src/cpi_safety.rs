//! Cross-program-invocation safety scanner.
//!
//! Flags `invoke`/`invoke_signed` call sites in files that never compare the
//! target program id against a known id — the shape of an arbitrary-CPI hole.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use hydra_core::cache::ScanCache;
use hydra_core::domain::finding::{Finding, Severity, VulnClass};
use hydra_core::scanner::Scanner;

use crate::support::scan_tree;

pub const SCANNER_ID: &str = "cpi-safety";

const OWNED_CLASSES: &[VulnClass] = &[VulnClass::ArbitraryCpi];

static CPI_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\binvoke(_signed)?\s*\(").expect("cpi regex"));

/// Program-id verification shapes that make a CPI target trustworthy.
static PROGRAM_ID_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(::ID\b|::id\(\)|check_id|\bprogram_id\s*==|==\s*program_id)")
        .expect("program id regex")
});

pub struct CpiSafetyScanner {
    cache: Option<Arc<ScanCache>>,
}

impl CpiSafetyScanner {
    pub fn new(cache: Option<Arc<ScanCache>>) -> Self {
        Self { cache }
    }
}

fn detect(path: &Path, contents: &str) -> Vec<Finding> {
    if PROGRAM_ID_CHECK.is_match(contents) {
        return Vec::new();
    }

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| CPI_CALL.is_match(line))
        .map(|(index, line)| {
            Finding::new(
                SCANNER_ID,
                VulnClass::ArbitraryCpi,
                Severity::High,
                60,
                path,
                index as u32 + 1,
                "CPI target program is not verified",
                "invoke is called while this file never compares the target \
                 program id against a known id",
                line.trim().to_string(),
            )
        })
        .collect()
}

#[async_trait]
impl Scanner for CpiSafetyScanner {
    fn id(&self) -> &str {
        SCANNER_ID
    }

    async fn scan(&self, root: &Path) -> anyhow::Result<Vec<Finding>> {
        Ok(scan_tree(
            SCANNER_ID,
            OWNED_CLASSES,
            self.cache.as_deref(),
            root,
            detect,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flags_unverified_invoke() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cpi.rs"),
            "fn forward(ix: Instruction) {\n    invoke(&ix, accounts);\n}\n",
        )
        .unwrap();

        let scanner = CpiSafetyScanner::new(None);
        let findings = scanner.scan(dir.path()).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].vuln_class, VulnClass::ArbitraryCpi);
        assert_eq!(findings[0].line, 2);
    }

    #[tokio::test]
    async fn program_id_comparison_suppresses_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cpi.rs"),
            "fn forward(ix: Instruction) {\n    assert!(ix.program_id == spl_token::ID);\n    invoke(&ix, accounts);\n}\n",
        )
        .unwrap();

        let scanner = CpiSafetyScanner::new(None);
        let findings = scanner.scan(dir.path()).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn honors_audit_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpi.rs"), "// HYDRA_VULN:arbitrary_cpi\n").unwrap();

        let scanner = CpiSafetyScanner::new(None);
        let findings = scanner.scan(dir.path()).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, 88);
    }
}
