//! Deterministic signals adapter: language-agnostic regex detectors.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use hydra_core::cache::ScanCache;
use hydra_core::domain::finding::{Finding, Severity, VulnClass};
use hydra_core::scanner::Scanner;

use crate::support::scan_tree;

pub const SCANNER_ID: &str = "deterministic-signals";

const OWNED_CLASSES: &[VulnClass] = &[
    VulnClass::SqlInjection,
    VulnClass::CommandInjection,
    VulnClass::PathTraversal,
    VulnClass::HardcodedSecret,
];

struct Signal {
    class: VulnClass,
    severity: Severity,
    confidence: u8,
    title: &'static str,
    description: &'static str,
    pattern: &'static LazyLock<Regex>,
}

static SQL_BUILD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(SELECT\s+.+\s+FROM|INSERT\s+INTO|UPDATE\s+\w+\s+SET|DELETE\s+FROM).*(\$\{|format!|\+\s*\w|%s|\{\})"#)
        .expect("sql regex")
});

static SHELL_BUILD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(Command::new|child_process|subprocess|os\.system|popen|exec\w*\()\s*.*(\$\{|format!|\+\s*\w|%s|\{\})"#)
        .expect("shell regex")
});

static TRAVERSAL_JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(join|push|concat)\s*\(.*(req|request|input|param|query|user)"#)
        .expect("traversal regex")
});

static INLINE_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|secret|password|private[_-]?key|token)\s*[:=]\s*"[A-Za-z0-9+/_\-]{16,}""#)
        .expect("secret regex")
});

static SIGNALS: LazyLock<Vec<Signal>> = LazyLock::new(|| {
    vec![
        Signal {
            class: VulnClass::SqlInjection,
            severity: Severity::High,
            confidence: 65,
            title: "SQL statement built from interpolated input",
            description: "string-built SQL mixes query structure with data",
            pattern: &SQL_BUILD,
        },
        Signal {
            class: VulnClass::CommandInjection,
            severity: Severity::High,
            confidence: 65,
            title: "Shell command built from interpolated input",
            description: "interpolated values reach a process-spawning call",
            pattern: &SHELL_BUILD,
        },
        Signal {
            class: VulnClass::PathTraversal,
            severity: Severity::Medium,
            confidence: 55,
            title: "Path joined with user-controlled input",
            description: "request data flows into a filesystem path without \
                          normalization",
            pattern: &TRAVERSAL_JOIN,
        },
        Signal {
            class: VulnClass::HardcodedSecret,
            severity: Severity::Medium,
            confidence: 85,
            title: "Credential material committed to source",
            description: "an inline literal looks like a key, token, or password",
            pattern: &INLINE_SECRET,
        },
    ]
});

pub struct SignalsScanner {
    cache: Option<Arc<ScanCache>>,
}

impl SignalsScanner {
    pub fn new(cache: Option<Arc<ScanCache>>) -> Self {
        Self { cache }
    }
}

fn detect(path: &Path, contents: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        for signal in SIGNALS.iter() {
            if signal.pattern.is_match(line) {
                findings.push(Finding::new(
                    SCANNER_ID,
                    signal.class,
                    signal.severity,
                    signal.confidence,
                    path,
                    index as u32 + 1,
                    signal.title,
                    signal.description,
                    line.trim().to_string(),
                ));
            }
        }
    }
    findings
}

#[async_trait]
impl Scanner for SignalsScanner {
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
