//! Reasoner-backed scanners, one per vulnerability focus area.
//!
//! Appended to the task set only when a reasoner is configured, and always
//! with the long agent deadline. Responses are validated at ingress: unknown
//! vulnerability classes, bad severities, and out-of-tree files are dropped,
//! never propagated.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use hydra_core::domain::finding::{Finding, Severity, VulnClass};
use hydra_core::reasoner::{parse_response, Reasoner, ReasonerRequest};
use hydra_core::scanner::Scanner;

use crate::support::source_files;

const MAX_PROMPT_FILES: usize = 8;
const MAX_CHARS_PER_FILE: usize = 8_000;

/// Vulnerability focus areas for the reasoner-backed scanners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusArea {
    AccessControl,
    CpiAndAccounts,
    Arithmetic,
    Injection,
}

impl FocusArea {
    pub fn all() -> &'static [FocusArea] {
        &[
            FocusArea::AccessControl,
            FocusArea::CpiAndAccounts,
            FocusArea::Arithmetic,
            FocusArea::Injection,
        ]
    }

    pub fn slug(&self) -> &'static str {
        match self {
            FocusArea::AccessControl => "access-control",
            FocusArea::CpiAndAccounts => "cpi-and-accounts",
            FocusArea::Arithmetic => "arithmetic",
            FocusArea::Injection => "injection",
        }
    }

    fn brief(&self) -> &'static str {
        match self {
            FocusArea::AccessControl => {
                "missing signer or owner checks, privilege escalation, account \
                 re-initialization"
            }
            FocusArea::CpiAndAccounts => {
                "arbitrary cross-program invocation, unverified program ids, \
                 non-canonical PDA bumps"
            }
            FocusArea::Arithmetic => "integer overflow and unchecked balance arithmetic",
            FocusArea::Injection => {
                "sql injection, command injection, path traversal, hardcoded secrets"
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FindingWire {
    vuln_class: String,
    severity: Severity,
    confidence: u8,
    file: String,
    line: u32,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    evidence: String,
}

#[derive(Debug, Deserialize)]
struct FindingsWire {
    #[serde(default)]
    findings: Vec<FindingWire>,
}

pub struct LlmFocusScanner {
    id: String,
    focus: FocusArea,
    reasoner: Arc<dyn Reasoner>,
}

impl LlmFocusScanner {
    pub fn new(focus: FocusArea, reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            id: format!("llm-focus:{}", focus.slug()),
            focus,
            reasoner,
        }
    }

    fn validate(&self, root: &Path, wire: FindingWire) -> Option<Finding> {
        // Ingress validation: reject unknown classes outright.
        let class = match VulnClass::from_str(&wire.vuln_class) {
            Ok(c) => c,
            Err(_) => {
                debug!(scanner = %self.id, class = %wire.vuln_class, "dropping unknown class");
                return None;
            }
        };
        if wire.line == 0 {
            return None;
        }

        let file = PathBuf::from(&wire.file);
        let file = if file.is_absolute() {
            file
        } else {
            root.join(file)
        };
        if !file.starts_with(root) || !file.is_file() {
            debug!(scanner = %self.id, file = %wire.file, "dropping out-of-tree file");
            return None;
        }

        Some(Finding::new(
            &self.id,
            class,
            wire.severity,
            wire.confidence.min(100),
            file,
            wire.line,
            wire.title,
            wire.description,
            wire.evidence,
        ))
    }
}

#[async_trait]
impl Scanner for LlmFocusScanner {
    fn id(&self) -> &str {
        &self.id
    }

    async fn scan(&self, root: &Path) -> anyhow::Result<Vec<Finding>> {
        let mut sections = Vec::new();
        for path in source_files(root).into_iter().take(MAX_PROMPT_FILES) {
            let Ok(mut contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            contents.truncate(
                contents
                    .char_indices()
                    .nth(MAX_CHARS_PER_FILE)
                    .map(|(i, _)| i)
                    .unwrap_or(contents.len()),
            );
            let rel = path.strip_prefix(root).unwrap_or(&path);
            sections.push(format!("=== {} ===\n{contents}", rel.display()));
        }
        if sections.is_empty() {
            return Ok(Vec::new());
        }

        let request = ReasonerRequest {
            system: format!(
                "You are a security auditor focused on: {}. Respond with a single JSON \
                 object: {{findings: [{{vuln_class, severity, confidence, file, line, \
                 title, description, evidence}}]}}. vuln_class must be one of the known \
                 snake_case tags; severity one of CRITICAL|HIGH|MEDIUM|LOW; file a path \
                 relative to the repository root.",
                self.focus.brief()
            ),
            prompt: sections.join("\n\n"),
        };

        let text = self.reasoner.complete(&request).await?;
        let wire: FindingsWire = parse_response(&text)?;
        Ok(wire
            .findings
            .into_iter()
            .filter_map(|w| self.validate(root, w))
            .collect())
    }
}
