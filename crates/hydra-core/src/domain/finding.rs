//! Findings: coordinate-addressed vulnerability reports.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::digest::hash16;
use crate::domain::error::HydraError;

/// Severity of a finding. The derived `Ord` gives `CRITICAL > HIGH > MEDIUM > LOW`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => f.write_str("CRITICAL"),
            Severity::High => f.write_str("HIGH"),
            Severity::Medium => f.write_str("MEDIUM"),
            Severity::Low => f.write_str("LOW"),
        }
    }
}

/// Closed enumeration of vulnerability classes.
///
/// Unknown tags never enter the pipeline: parsing rejects them at ingress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VulnClass {
    MissingSignerCheck,
    MissingOwnerCheck,
    ArbitraryCpi,
    NonCanonicalBump,
    AccountReinitialization,
    IntegerOverflow,
    SqlInjection,
    CommandInjection,
    PathTraversal,
    HardcodedSecret,
}

impl VulnClass {
    /// All classes, in a stable order.
    pub fn all() -> &'static [VulnClass] {
        &[
            VulnClass::MissingSignerCheck,
            VulnClass::MissingOwnerCheck,
            VulnClass::ArbitraryCpi,
            VulnClass::NonCanonicalBump,
            VulnClass::AccountReinitialization,
            VulnClass::IntegerOverflow,
            VulnClass::SqlInjection,
            VulnClass::CommandInjection,
            VulnClass::PathTraversal,
            VulnClass::HardcodedSecret,
        ]
    }

    /// Wire tag (`snake_case`) for this class.
    pub fn tag(&self) -> &'static str {
        match self {
            VulnClass::MissingSignerCheck => "missing_signer_check",
            VulnClass::MissingOwnerCheck => "missing_owner_check",
            VulnClass::ArbitraryCpi => "arbitrary_cpi",
            VulnClass::NonCanonicalBump => "non_canonical_bump",
            VulnClass::AccountReinitialization => "account_reinitialization",
            VulnClass::IntegerOverflow => "integer_overflow",
            VulnClass::SqlInjection => "sql_injection",
            VulnClass::CommandInjection => "command_injection",
            VulnClass::PathTraversal => "path_traversal",
            VulnClass::HardcodedSecret => "hardcoded_secret",
        }
    }
}

impl fmt::Display for VulnClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for VulnClass {
    type Err = HydraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VulnClass::all()
            .iter()
            .find(|c| c.tag() == s)
            .copied()
            .ok_or_else(|| HydraError::UnknownVulnClass(s.to_string()))
    }
}

/// A typed, coordinate-addressed vulnerability report.
///
/// Immutable after aggregation. Two findings are *same location* iff
/// `(vuln_class, file, line)` match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    /// Stable id: 16-hex prefix of SHA-256 over `scanner_id|vuln_class|file|line`.
    pub id: String,

    /// Id of the scanner (or ` + `-joined scanners) that produced this finding.
    pub scanner_id: String,

    pub vuln_class: VulnClass,

    pub severity: Severity,

    /// Confidence in [0, 100].
    pub confidence: u8,

    /// Absolute path of the affected file.
    pub file: PathBuf,

    /// 1-based line number.
    pub line: u32,

    pub title: String,

    pub description: String,

    pub evidence: String,
}

impl Finding {
    /// Create a finding, deriving its stable id from the identity coordinates.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scanner_id: impl Into<String>,
        vuln_class: VulnClass,
        severity: Severity,
        confidence: u8,
        file: impl Into<PathBuf>,
        line: u32,
        title: impl Into<String>,
        description: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        let scanner_id = scanner_id.into();
        let file = file.into();
        let id = Self::compute_id(&scanner_id, vuln_class, &file, line);
        Self {
            id,
            scanner_id,
            vuln_class,
            severity,
            confidence: confidence.min(100),
            file,
            line,
            title: title.into(),
            description: description.into(),
            evidence: evidence.into(),
        }
    }

    /// Deterministic id over `(scanner_id, vuln_class, file, line)`.
    pub fn compute_id(scanner_id: &str, vuln_class: VulnClass, file: &std::path::Path, line: u32) -> String {
        let material = format!("{scanner_id}|{vuln_class}|{}|{line}", file.display());
        hash16(material.as_bytes())
    }

    /// The dedup coordinate: `(vuln_class, file, line)`.
    pub fn location_key(&self) -> (VulnClass, PathBuf, u32) {
        (self.vuln_class, self.file.clone(), self.line)
    }

    /// Distinct scanner ids that contributed to this finding.
    pub fn scanner_ids(&self) -> Vec<&str> {
        self.scanner_id.split(" + ").collect()
    }

    /// Whether at least two distinct scanners reported at this coordinate.
    pub fn is_corroborated(&self) -> bool {
        self.scanner_ids().len() >= 2
    }
}
