//! Shared scanning plumbing: bounded traversal, audit markers, cache wiring.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use hydra_core::cache::ScanCache;
use hydra_core::domain::finding::{Finding, Severity, VulnClass};

const MAX_FILES_PER_SCAN: usize = 2_000;

const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".idea",
    ".vscode",
    ".hydra",
    "node_modules",
    "target",
    "dist",
    "build",
    "coverage",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "sol", "c", "cpp", "java",
];

/// Explicit audit marker, honored by the scanner owning the named class.
static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HYDRA_VULN:([a-z_]+)").expect("marker regex"));

/// Deterministic, bounded walk of source files under `root`.
pub(crate) fn source_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !IGNORED_DIRS.contains(&name))
                .unwrap_or(true)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| SOURCE_EXTENSIONS.contains(&e))
                .unwrap_or(false)
        })
        .take(MAX_FILES_PER_SCAN)
        .collect()
}

/// Findings for explicit `HYDRA_VULN:<class>` markers in the classes this
/// scanner owns.
pub(crate) fn marker_findings(
    scanner_id: &str,
    owned: &[VulnClass],
    path: &Path,
    contents: &str,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        for capture in MARKER.captures_iter(line) {
            let Ok(class) = VulnClass::from_str(&capture[1]) else {
                continue;
            };
            if !owned.contains(&class) {
                continue;
            }
            findings.push(Finding::new(
                scanner_id,
                class,
                Severity::High,
                88,
                path,
                index as u32 + 1,
                format!("Audit marker: {class}"),
                format!("explicit {class} marker found during audit"),
                line.trim().to_string(),
            ));
        }
    }
    findings
}

/// Scan every source file under `root`, consulting the cache per file.
///
/// `detect` runs only on cache misses; hits replay the cached findings.
pub(crate) fn scan_tree(
    scanner_id: &str,
    owned: &[VulnClass],
    cache: Option<&ScanCache>,
    root: &Path,
    detect: impl Fn(&Path, &str) -> Vec<Finding>,
) -> Vec<Finding> {
    let mut all = Vec::new();
    for path in source_files(root) {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        if let Some(cache) = cache {
            if let Some(hit) = cache.lookup(scanner_id, &path, &bytes) {
                all.extend(hit);
                continue;
            }
        }

        let contents = String::from_utf8_lossy(&bytes);
        let mut findings = marker_findings(scanner_id, owned, &path, &contents);
        findings.extend(detect(&path, &contents));

        if let Some(cache) = cache {
            cache.put(scanner_id, &path, &bytes, findings.clone(), None);
        }
        all.extend(findings);
    }
    all
}
