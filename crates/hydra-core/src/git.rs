//! Git integration: repository context capture and changed-file resolution.
//!
//! Git is an external process. Every helper here tolerates its absence:
//! missing commit/tree values degrade to `None` and diff resolution degrades
//! to an empty scope rather than failing the scan.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Repository state captured for threat-model fingerprinting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GitContext {
    pub commit: Option<String>,
    pub tree: Option<String>,
    pub dirty: bool,
}

fn git_stdout(repo_dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Capture HEAD commit, tree, and working-tree dirtiness. Missing-safe: a
/// directory outside any repository yields an all-empty context.
pub fn capture_context(repo_dir: &Path) -> GitContext {
    let commit = git_stdout(repo_dir, &["rev-parse", "HEAD"]);
    let tree = git_stdout(repo_dir, &["rev-parse", "HEAD^{tree}"]);
    let dirty = git_stdout(repo_dir, &["status", "--porcelain"]).is_some();
    GitContext {
        commit,
        tree,
        dirty,
    }
}

/// Resolve the absolute changed-file set between two refs, plus working-tree
/// untracked files.
///
/// `head_ref` defaults to `HEAD`. Only files that still exist under `root`
/// are returned. Git failures degrade to an empty set.
pub fn resolve_changed_files(
    root: &Path,
    base_ref: &str,
    head_ref: Option<&str>,
) -> Vec<PathBuf> {
    let head = head_ref.unwrap_or("HEAD");
    let range = format!("{base_ref}..{head}");

    let mut relative: Vec<String> = Vec::new();

    match git_stdout(
        root,
        &["diff", "--name-only", "--diff-filter=ACMR", &range],
    ) {
        Some(out) => relative.extend(out.lines().map(str::to_string)),
        None => {
            warn!(range = %range, "git diff produced no output; scope may be empty");
        }
    }

    if let Some(out) = git_stdout(root, &["ls-files", "--others", "--exclude-standard"]) {
        relative.extend(out.lines().map(str::to_string));
    }

    relative.sort();
    relative.dedup();

    relative
        .into_iter()
        .map(|rel| root.join(rel))
        .filter(|abs| abs.is_file())
        .collect()
}

/// Normalize an explicit changed-file list to existing absolute paths under `root`.
pub fn normalize_changed_files(root: &Path, files: &[PathBuf]) -> Vec<PathBuf> {
    let mut resolved: Vec<PathBuf> = files
        .iter()
        .map(|f| if f.is_absolute() { f.clone() } else { root.join(f) })
        .filter(|abs| abs.is_file())
        .collect();
    resolved.sort();
    resolved.dedup();
    resolved
}
