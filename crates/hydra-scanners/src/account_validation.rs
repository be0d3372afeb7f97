//! Anchor account-validation scanner.
//!
//! Flags instruction accounts that reach state-changing code without the
//! checks Anchor would otherwise enforce: raw `AccountInfo` authorities with
//! no signer constraint, `/// CHECK:` escape hatches, and re-initializable
//! accounts.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use hydra_core::cache::ScanCache;
use hydra_core::domain::finding::{Finding, Severity, VulnClass};
use hydra_core::scanner::Scanner;

use crate::support::scan_tree;

pub const SCANNER_ID: &str = "account-validation";

const OWNED_CLASSES: &[VulnClass] = &[
    VulnClass::MissingSignerCheck,
    VulnClass::MissingOwnerCheck,
    VulnClass::AccountReinitialization,
];

/// Raw `AccountInfo` fields named like privileged parties.
static PRIVILEGED_ACCOUNT_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pub\s+(authority|admin|owner|payer|signer)\w*\s*:\s*(AccountInfo|UncheckedAccount)\s*<")
        .expect("account regex")
});

/// Anchor's unchecked-account escape hatch.
static CHECK_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"///\s*CHECK\s*:").expect("check regex"));

/// `init_if_needed` allows re-initialization unless guarded.
static INIT_IF_NEEDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\binit_if_needed\b").expect("init regex"));

static SIGNER_CONSTRAINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Signer\s*<|#\[account\([^)]*signer").expect("signer regex"));

pub struct AccountValidationScanner {
    cache: Option<Arc<ScanCache>>,
}

impl AccountValidationScanner {
    pub fn new(cache: Option<Arc<ScanCache>>) -> Self {
        Self { cache }
    }
}

fn detect(path: &Path, contents: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let file_has_signer = SIGNER_CONSTRAINT.is_match(contents);

    for (index, line) in contents.lines().enumerate() {
        let line_no = index as u32 + 1;

        if let Some(capture) = PRIVILEGED_ACCOUNT_INFO.captures(line) {
            if !file_has_signer {
                findings.push(Finding::new(
                    SCANNER_ID,
                    VulnClass::MissingSignerCheck,
                    Severity::High,
                    60,
                    path,
                    line_no,
                    format!("Privileged account `{}` lacks a signer constraint", &capture[1]),
                    "a raw AccountInfo authority is accepted without any Signer<'info> \
                     field or signer constraint in this file",
                    line.trim().to_string(),
                ));
            }
        }

        if CHECK_ESCAPE.is_match(line) {
            findings.push(Finding::new(
                SCANNER_ID,
                VulnClass::MissingOwnerCheck,
                Severity::Medium,
                55,
                path,
                line_no,
                "Unchecked account escape hatch",
                "a /// CHECK: comment disables Anchor's owner and type validation",
                line.trim().to_string(),
            ));
        }

        if INIT_IF_NEEDED.is_match(line) {
            findings.push(Finding::new(
                SCANNER_ID,
                VulnClass::AccountReinitialization,
                Severity::Medium,
                55,
                path,
                line_no,
                "Account can be re-initialized",
                "init_if_needed permits re-running initialization against an existing account",
                line.trim().to_string(),
            ));
        }
    }
    findings
}

#[async_trait]
impl Scanner for AccountValidationScanner {
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
