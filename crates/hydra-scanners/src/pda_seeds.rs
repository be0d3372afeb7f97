//! PDA derivation and arithmetic scanner.
//!
//! Flags `create_program_address` seed derivations that skip the canonical
//! bump, and unchecked arithmetic on lamport or token amounts.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use hydra_core::cache::ScanCache;
use hydra_core::domain::finding::{Finding, Severity, VulnClass};
use hydra_core::scanner::Scanner;

use crate::support::scan_tree;

pub const SCANNER_ID: &str = "pda-seeds";

const OWNED_CLASSES: &[VulnClass] = &[VulnClass::NonCanonicalBump, VulnClass::IntegerOverflow];

/// Direct derivation accepts caller-supplied bumps; only
/// `find_program_address` pins the canonical one.
static DIRECT_DERIVATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bcreate_program_address\s*\(").expect("pda regex"));

/// Raw `+`/`-`/`*` on balance-shaped values.
static UNCHECKED_BALANCE_MATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(lamports\(\)|\bamount\b|\bbalance\b)\s*[+\-*]=?\s*\w").expect("math regex")
});

static CHECKED_MATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"checked_(add|sub|mul|div)|saturating_(add|sub|mul)").expect("checked regex")
});

pub struct PdaSeedsScanner {
    cache: Option<Arc<ScanCache>>,
}

impl PdaSeedsScanner {
    pub fn new(cache: Option<Arc<ScanCache>>) -> Self {
        Self { cache }
    }
}

fn detect(path: &Path, contents: &str) -> Vec<Finding> {
    let mut findings = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line_no = index as u32 + 1;

        if DIRECT_DERIVATION.is_match(line) {
            findings.push(Finding::new(
                SCANNER_ID,
                VulnClass::NonCanonicalBump,
                Severity::High,
                65,
                path,
                line_no,
                "PDA derived without canonical bump",
                "create_program_address accepts any bump; find_program_address \
                 pins the canonical one",
                line.trim().to_string(),
            ));
        }

        if UNCHECKED_BALANCE_MATH.is_match(line) && !CHECKED_MATH.is_match(line) {
            findings.push(Finding::new(
                SCANNER_ID,
                VulnClass::IntegerOverflow,
                Severity::Medium,
                55,
                path,
                line_no,
                "Unchecked arithmetic on a balance value",
                "raw arithmetic on lamport or token amounts can wrap",
                line.trim().to_string(),
            ));
        }
    }
    findings
}

#[async_trait]
impl Scanner for PdaSeedsScanner {
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
    async fn flags_direct_derivation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pda.rs"),
            "let pda = Pubkey::create_program_address(&[seed, &[bump]], &id)?;\n",
        )
        .unwrap();

        let scanner = PdaSeedsScanner::new(None);
        let findings = scanner.scan(dir.path()).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].vuln_class, VulnClass::NonCanonicalBump);
    }

    #[tokio::test]
    async fn flags_unchecked_balance_math() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vault.rs"),
            "let new_balance = vault.lamports() + amount;\n",
        )
        .unwrap();

        let scanner = PdaSeedsScanner::new(None);
        let findings = scanner.scan(dir.path()).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].vuln_class, VulnClass::IntegerOverflow);
    }

    #[tokio::test]
    async fn checked_math_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vault.rs"),
            "let new_balance = balance.checked_add(amount).ok_or(Error::Overflow)?;\n",
        )
        .unwrap();

        let scanner = PdaSeedsScanner::new(None);
        let findings = scanner.scan(dir.path()).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn honors_audit_markers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pda.rs"),
            "// HYDRA_VULN:non_canonical_bump\n// HYDRA_VULN:integer_overflow\n",
        )
        .unwrap();

        let scanner = PdaSeedsScanner::new(None);
        let findings = scanner.scan(dir.path()).await.unwrap();
        assert_eq!(findings.len(), 2);
    }
}
