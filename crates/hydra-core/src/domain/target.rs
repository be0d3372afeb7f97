//! Scan targets: what a single pipeline run is scoped to.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{HydraError, Result};

/// Scan mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Full,
    Diff,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Full => f.write_str("full"),
            ScanMode::Diff => f.write_str("diff"),
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = HydraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(ScanMode::Full),
            "diff" => Ok(ScanMode::Diff),
            other => Err(HydraError::InvalidTarget(format!("unknown mode: {other}"))),
        }
    }
}

/// Diff scope for a diff-mode scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiffSpec {
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    /// Absolute paths of changed files under the target root.
    pub changed_files: Vec<PathBuf>,
}

/// A resolved scan target. `root_path` is absolute and points to a directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanTarget {
    pub root_path: PathBuf,
    pub mode: ScanMode,
    pub diff: Option<DiffSpec>,
}

impl ScanTarget {
    /// Resolve a full-mode target. Canonicalizes the root and requires a directory.
    pub fn full(root: impl AsRef<Path>) -> Result<Self> {
        let root_path = canonical_dir(root.as_ref())?;
        Ok(Self {
            root_path,
            mode: ScanMode::Full,
            diff: None,
        })
    }

    /// Resolve a diff-mode target. `head_ref` without `base_ref` is rejected
    /// at ingress.
    pub fn diff(
        root: impl AsRef<Path>,
        base_ref: Option<String>,
        head_ref: Option<String>,
        changed_files: Vec<PathBuf>,
    ) -> Result<Self> {
        if head_ref.is_some() && base_ref.is_none() {
            return Err(HydraError::InvalidDiffRefs(
                "head_ref requires base_ref".to_string(),
            ));
        }
        let root_path = canonical_dir(root.as_ref())?;
        Ok(Self {
            root_path,
            mode: ScanMode::Diff,
            diff: Some(DiffSpec {
                base_ref,
                head_ref,
                changed_files,
            }),
        })
    }

    /// The changed-file set, empty for full scans.
    pub fn changed_files(&self) -> &[PathBuf] {
        self.diff
            .as_ref()
            .map(|d| d.changed_files.as_slice())
            .unwrap_or(&[])
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .map_err(|e| HydraError::InvalidTarget(format!("{}: {e}", path.display())))?;
    if !canonical.is_dir() {
        return Err(HydraError::InvalidTarget(format!(
            "{}: not a directory",
            canonical.display()
        )));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_target_canonicalizes_root() {
        let dir = tempfile::tempdir().unwrap();
        let target = ScanTarget::full(dir.path()).unwrap();
        assert!(target.root_path.is_absolute());
        assert_eq!(target.mode, ScanMode::Full);
        assert!(target.diff.is_none());
    }

    #[test]
    fn full_target_rejects_missing_path() {
        assert!(ScanTarget::full("/no/such/path/hydra").is_err());
    }

    #[test]
    fn full_target_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.rs");
        std::fs::write(&file, "fn main() {}").unwrap();
        assert!(ScanTarget::full(&file).is_err());
    }

    #[test]
    fn diff_target_rejects_head_without_base() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            ScanTarget::diff(dir.path(), None, Some("HEAD".to_string()), vec![]).unwrap_err();
        assert!(err.to_string().contains("head_ref requires base_ref"));
    }

    #[test]
    fn mode_parses_known_values_only() {
        assert_eq!("full".parse::<ScanMode>().unwrap(), ScanMode::Full);
        assert_eq!("diff".parse::<ScanMode>().unwrap(), ScanMode::Diff);
        assert!("incremental".parse::<ScanMode>().is_err());
    }
}
