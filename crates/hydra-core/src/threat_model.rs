//! Fingerprinted, append-only threat-model snapshots.
//!
//! A snapshot summarizes a repository's attack surface at a point in time.
//! Snapshots are keyed by a fingerprint over the scan scope and the git
//! state, so an unchanged repository reuses its cached version; any change
//! appends a new version with a strictly increasing revision.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::digest::{hash12, sha256_hex};
use crate::domain::error::{HydraError, Result};
use crate::domain::target::{ScanMode, ScanTarget};
use crate::git;

const SCHEMA_VERSION: u32 = 3;
const STORE_DIR: &str = ".hydra/threat-models";
const VERSIONS_FILE: &str = "versions.json";

/// Traversal caps.
const MAX_SOURCE_FILES: usize = 2_000;
const MAX_SCOPE_FILES: usize = 50;
const MAX_ENTRY_POINTS: usize = 24;

/// Directory names never descended into.
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

const ENTRY_FILENAMES: &[&str] = &[
    "main.rs", "lib.rs", "index.ts", "index.js", "main.py", "app.py", "main.go", "server.ts",
];

/// Heuristic summary of a repository's attack surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreatModelSummary {
    pub primary_language: String,
    pub language_breakdown: BTreeMap<String, usize>,
    pub detected_frameworks: Vec<String>,
    pub assets: Vec<String>,
    pub trust_boundaries: Vec<String>,
    pub entry_points: Vec<String>,
    pub attack_surface: Vec<String>,
    /// Relative paths in scope: the diff set in diff mode, else a capped
    /// sample of the full source set.
    pub scan_scope_files: Vec<String>,
}

/// One versioned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreatModelVersion {
    pub version_id: String,
    pub repo_id: String,
    /// Strictly increasing per repo.
    pub revision: u64,
    pub parent_version_id: Option<String>,
    pub schema_version: u32,
    pub fingerprint: String,
    pub summary: ThreatModelSummary,
    pub storage_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct VersionsDocument {
    schema_version: u32,
    repo_id: String,
    latest_version_id: Option<String>,
    by_fingerprint: BTreeMap<String, String>,
    versions: Vec<ThreatModelVersion>,
}

/// Result of `load_or_create`.
#[derive(Debug, Clone)]
pub struct LoadedThreatModel {
    pub version: ThreatModelVersion,
    pub loaded_from_cache: bool,
}

/// Append-only threat-model store rooted at the scanned repository.
pub struct ThreatModelStore {
    root: PathBuf,
}

impl ThreatModelStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Stable 12-hex repo id derived from the absolute root path.
    pub fn repo_id(root: &Path) -> String {
        hash12(root.to_string_lossy().as_bytes())
    }

    /// Load the cached version for this target's fingerprint, or synthesize
    /// and append a new one.
    pub fn load_or_create(&self, target: &ScanTarget) -> Result<LoadedThreatModel> {
        let repo_id = Self::repo_id(&target.root_path);
        let ctx = git::capture_context(&target.root_path);
        let fingerprint = compute_fingerprint(target, &ctx);

        let mut doc = self.load_document(&repo_id)?;

        if let Some(version_id) = doc.by_fingerprint.get(&fingerprint) {
            if let Some(version) = doc.versions.iter().find(|v| &v.version_id == version_id) {
                debug!(repo_id = %repo_id, version_id = %version.version_id, "threat model cache hit");
                return Ok(LoadedThreatModel {
                    version: version.clone(),
                    loaded_from_cache: true,
                });
            }
        }

        let summary = build_summary(target);
        let parent = doc.versions.last();
        let revision = parent.map(|v| v.revision + 1).unwrap_or(1);
        let version = ThreatModelVersion {
            version_id: format!("tm-{}", hash12(fingerprint.as_bytes())),
            repo_id: repo_id.clone(),
            revision,
            parent_version_id: parent.map(|v| v.version_id.clone()),
            schema_version: SCHEMA_VERSION,
            fingerprint: fingerprint.clone(),
            summary,
            storage_path: self.versions_path(&repo_id),
            created_at: Utc::now(),
        };

        doc.by_fingerprint
            .insert(fingerprint, version.version_id.clone());
        doc.latest_version_id = Some(version.version_id.clone());
        doc.versions.push(version.clone());
        self.persist_document(&repo_id, &doc)?;

        info!(
            repo_id = %repo_id,
            version_id = %version.version_id,
            revision = version.revision,
            "threat model version created"
        );
        Ok(LoadedThreatModel {
            version,
            loaded_from_cache: false,
        })
    }

    fn versions_path(&self, repo_id: &str) -> PathBuf {
        self.root.join(STORE_DIR).join(repo_id).join(VERSIONS_FILE)
    }

    fn load_document(&self, repo_id: &str) -> Result<VersionsDocument> {
        let path = self.versions_path(repo_id);
        if !path.exists() {
            return Ok(VersionsDocument {
                schema_version: SCHEMA_VERSION,
                repo_id: repo_id.to_string(),
                ..Default::default()
            });
        }
        let bytes = std::fs::read(&path)?;
        match serde_json::from_slice::<VersionsDocument>(&bytes) {
            Ok(doc) if doc.schema_version == SCHEMA_VERSION => Ok(doc),
            _ => Ok(VersionsDocument {
                schema_version: SCHEMA_VERSION,
                repo_id: repo_id.to_string(),
                ..Default::default()
            }),
        }
    }

    fn persist_document(&self, repo_id: &str, doc: &VersionsDocument) -> Result<()> {
        let path = self.versions_path(repo_id);
        let dir = path
            .parent()
            .ok_or_else(|| HydraError::StorageError("versions path has no parent".to_string()))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(doc)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|e| {
            HydraError::StorageError(format!("versions rename failed: {}", e.error))
        })?;
        Ok(())
    }
}

/// Digest over everything that distinguishes one scan scope from another.
fn compute_fingerprint(target: &ScanTarget, ctx: &git::GitContext) -> String {
    let mut relative: Vec<String> = target
        .changed_files()
        .iter()
        .map(|abs| {
            abs.strip_prefix(&target.root_path)
                .unwrap_or(abs)
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    relative.sort();
    let changed_digest = sha256_hex(relative.join("\n").as_bytes());

    let diff = target.diff.as_ref();
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        target.mode,
        ctx.commit.as_deref().unwrap_or(""),
        ctx.tree.as_deref().unwrap_or(""),
        ctx.dirty,
        diff.and_then(|d| d.base_ref.as_deref()).unwrap_or(""),
        diff.and_then(|d| d.head_ref.as_deref()).unwrap_or(""),
        changed_digest,
    );
    sha256_hex(material.as_bytes())
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Bounded, deterministic walk of the repository's source files.
fn collect_source_files(root: &Path) -> Vec<PathBuf> {
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
        .filter(|path| is_source_file(path))
        .take(MAX_SOURCE_FILES)
        .collect()
}

fn relative_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn language_for_ext(ext: &str) -> &'static str {
    match ext {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "py" => "python",
        "go" => "go",
        "sol" => "solidity",
        "c" | "cpp" => "c/c++",
        "java" => "java",
        _ => "unknown",
    }
}

fn detect_frameworks(root: &Path) -> Vec<String> {
    let mut frameworks = Vec::new();
    if root.join("Anchor.toml").is_file() {
        frameworks.push("anchor".to_string());
    }
    if let Ok(manifest) = std::fs::read_to_string(root.join("Cargo.toml")) {
        if manifest.contains("solana-program") || manifest.contains("anchor-lang") {
            frameworks.push("solana".to_string());
        }
        if manifest.contains("axum") || manifest.contains("actix-web") {
            frameworks.push("rust-http".to_string());
        }
    }
    if let Ok(pkg) = std::fs::read_to_string(root.join("package.json")) {
        frameworks.push("node".to_string());
        if pkg.contains("\"express\"") {
            frameworks.push("express".to_string());
        }
    }
    frameworks.dedup();
    frameworks
}

/// First public function names from a Rust source, used as entry-point candidates.
fn public_fns(contents: &str, limit: usize) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let rest = trimmed.strip_prefix("pub fn ")?;
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if name.is_empty() {
                None
            } else {
                Some(name)
            }
        })
        .take(limit)
        .collect()
}

/// Build the summary. Pure with respect to `(root_path, mode, diff)` and the
/// filesystem contents at generation time.
fn build_summary(target: &ScanTarget) -> ThreatModelSummary {
    let root = &target.root_path;
    let sources = collect_source_files(root);

    let mut language_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    for path in &sources {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            *language_breakdown.entry(ext.to_string()).or_insert(0) += 1;
        }
    }
    // First extension in key order wins a count tie, keeping the summary a
    // pure function of the tree.
    let primary_language = language_breakdown
        .iter()
        .fold(None::<(&String, usize)>, |best, (ext, count)| match best {
            Some((_, best_count)) if *count <= best_count => best,
            _ => Some((ext, *count)),
        })
        .map(|(ext, _)| language_for_ext(ext).to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let detected_frameworks = detect_frameworks(root);

    let mut entry_points: Vec<String> = Vec::new();
    for path in &sources {
        if entry_points.len() >= MAX_ENTRY_POINTS {
            break;
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if ENTRY_FILENAMES.contains(&file_name) {
            entry_points.push(relative_str(root, path));
        }
    }
    for path in sources.iter().filter(|p| {
        p.extension().and_then(|e| e.to_str()) == Some("rs")
    }) {
        if entry_points.len() >= MAX_ENTRY_POINTS {
            break;
        }
        if let Ok(contents) = std::fs::read_to_string(path) {
            let remaining = MAX_ENTRY_POINTS - entry_points.len();
            for name in public_fns(&contents, remaining) {
                entry_points.push(format!("{}::{}", relative_str(root, path), name));
            }
        }
    }

    let mut assets: Vec<String> = sources
        .iter()
        .map(|p| relative_str(root, p))
        .filter(|rel| {
            rel.ends_with(".env") || rel.contains("keypair") || rel.ends_with(".pem")
        })
        .collect();
    if detected_frameworks.iter().any(|f| f == "solana" || f == "anchor") {
        assets.push("program accounts and lamport balances".to_string());
    }

    let mut trust_boundaries = Vec::new();
    if detected_frameworks.iter().any(|f| f == "anchor" || f == "solana") {
        trust_boundaries.push("instruction entrypoints (untrusted accounts)".to_string());
    }
    if detected_frameworks.iter().any(|f| f == "rust-http" || f == "express") {
        trust_boundaries.push("http request handlers".to_string());
    }
    if sources.iter().any(|p| {
        p.file_name().and_then(|n| n.to_str()) == Some("main.rs")
    }) {
        trust_boundaries.push("cli arguments".to_string());
    }

    let mut attack_surface = trust_boundaries.clone();
    attack_surface.push(format!("{} source files", sources.len()));
    attack_surface.push(format!("{} entry points", entry_points.len()));

    let scan_scope_files: Vec<String> = if target.mode == ScanMode::Diff {
        target
            .changed_files()
            .iter()
            .map(|abs| relative_str(root, abs))
            .take(MAX_SCOPE_FILES)
            .collect()
    } else {
        sources
            .iter()
            .map(|p| relative_str(root, p))
            .take(MAX_SCOPE_FILES)
            .collect()
    };

    ThreatModelSummary {
        primary_language,
        language_breakdown,
        detected_frameworks,
        assets,
        trust_boundaries,
        entry_points,
        attack_surface,
        scan_scope_files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/main.rs"),
            "pub fn initialize() {}\npub fn withdraw() {}\nfn helper() {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("src/util.ts"), "export const x = 1;\n").unwrap();
        dir
    }

    #[test]
    fn identical_fingerprint_returns_cached_version() {
        let repo = make_repo();
        let store = ThreatModelStore::new(repo.path());
        let target = ScanTarget::full(repo.path()).unwrap();

        let first = store.load_or_create(&target).unwrap();
        assert!(!first.loaded_from_cache);
        assert_eq!(first.version.revision, 1);

        let second = store.load_or_create(&target).unwrap();
        assert!(second.loaded_from_cache);
        assert_eq!(second.version.version_id, first.version.version_id);
    }

    #[test]
    fn changed_scope_appends_with_greater_revision() {
        let repo = make_repo();
        let store = ThreatModelStore::new(repo.path());

        let full = ScanTarget::full(repo.path()).unwrap();
        let first = store.load_or_create(&full).unwrap();

        let diff = ScanTarget::diff(
            repo.path(),
            Some("main".to_string()),
            None,
            vec![repo.path().join("src/main.rs")],
        )
        .unwrap();
        let second = store.load_or_create(&diff).unwrap();

        assert!(!second.loaded_from_cache);
        assert!(second.version.revision > first.version.revision);
        assert_eq!(
            second.version.parent_version_id.as_deref(),
            Some(first.version.version_id.as_str())
        );
    }

    #[test]
    fn history_is_retained_across_reopen() {
        let repo = make_repo();
        let target = ScanTarget::full(repo.path()).unwrap();

        {
            let store = ThreatModelStore::new(repo.path());
            store.load_or_create(&target).unwrap();
        }
        let store = ThreatModelStore::new(repo.path());
        let loaded = store.load_or_create(&target).unwrap();
        assert!(loaded.loaded_from_cache);
    }

    #[test]
    fn summary_captures_languages_and_entry_points() {
        let repo = make_repo();
        let target = ScanTarget::full(repo.path()).unwrap();
        let summary = build_summary(&target);

        assert_eq!(summary.primary_language, "rust");
        assert_eq!(summary.language_breakdown.get("rs"), Some(&1));
        assert_eq!(summary.language_breakdown.get("ts"), Some(&1));
        assert!(summary
            .entry_points
            .iter()
            .any(|e| e.ends_with("src/main.rs")));
        assert!(summary
            .entry_points
            .iter()
            .any(|e| e.ends_with("::withdraw")));
        assert!(!summary.scan_scope_files.is_empty());
    }

    #[test]
    fn summary_diff_mode_scopes_to_changed_files() {
        let repo = make_repo();
        let target = ScanTarget::diff(
            repo.path(),
            Some("main".to_string()),
            None,
            vec![repo.path().join("src/util.ts")],
        )
        .unwrap();
        let summary = build_summary(&target);
        assert_eq!(summary.scan_scope_files, vec!["src/util.ts".to_string()]);
    }

    #[test]
    fn ignored_directories_are_skipped() {
        let repo = make_repo();
        std::fs::create_dir_all(repo.path().join("node_modules/dep")).unwrap();
        std::fs::write(
            repo.path().join("node_modules/dep/index.js"),
            "module.exports = {};\n",
        )
        .unwrap();

        let files = collect_source_files(repo.path());
        assert!(files.iter().all(|p| !p.to_string_lossy().contains("node_modules")));
    }

    #[test]
    fn anchor_framework_detection() {
        let repo = make_repo();
        std::fs::write(repo.path().join("Anchor.toml"), "[programs.localnet]\n").unwrap();
        let frameworks = detect_frameworks(repo.path());
        assert!(frameworks.contains(&"anchor".to_string()));
    }
}
