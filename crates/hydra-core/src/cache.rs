//! Content-addressed scan cache: `(scanner_id × file)` → findings.
//!
//! Keys bind the scanner id, a 12-hex path hash, and the content hash of the
//! file bytes, so distinct paths with identical content never cross-contaminate
//! and any content change is an automatic miss.
//!
//! Persistence is a single JSON document under `.hydra/scan-cache/`; flushes
//! are tempfile+rename and only happen when the in-memory state is dirty.
//! A schema-version mismatch on load yields an empty store, never a partial
//! migration.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::digest::{hash12, sha256_hex};
use crate::domain::error::{HydraError, Result};
use crate::domain::finding::Finding;

const SCHEMA_VERSION: u32 = 2;
const CACHE_DIR: &str = ".hydra/scan-cache";
const CACHE_FILE: &str = "cache.json";

/// Default entry lifetime: 24 hours.
pub const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Eviction threshold.
pub const MAX_ENTRIES: usize = 5_000;

/// One cached scan result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub scanner_id: String,
    pub file_path: PathBuf,
    pub content_hash: String,
    pub findings: Vec<Finding>,
    pub cached_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.cached_at > Duration::milliseconds(self.ttl_ms as i64)
    }
}

/// Hit/miss/eviction counters for one cache lifetime.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCache {
    schema_version: u32,
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    dirty: bool,
}

/// Scan cache for one orchestrator instance.
///
/// Interior mutability keeps `&self` methods usable behind an `Arc` shared
/// across agent tasks; the persisted file has at most one writer because each
/// flush is a tempfile+rename of the whole document.
pub struct ScanCache {
    root: PathBuf,
    max_entries: usize,
    default_ttl_ms: u64,
    state: Mutex<CacheState>,
}

impl ScanCache {
    /// Open (or initialize) the cache for the repository at `root`.
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self::with_capacity(root, MAX_ENTRIES)
    }

    /// Open with an explicit eviction threshold.
    pub fn with_capacity(root: impl AsRef<Path>, max_entries: usize) -> Self {
        let root = root.as_ref().to_path_buf();
        let entries = match Self::load_entries(&root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "scan cache load failed; starting empty");
                HashMap::new()
            }
        };
        Self {
            root,
            max_entries,
            default_ttl_ms: DEFAULT_TTL_MS,
            state: Mutex::new(CacheState {
                entries,
                stats: CacheStats::default(),
                dirty: false,
            }),
        }
    }

    /// Replace the default entry lifetime applied when `put` receives no TTL.
    pub fn with_default_ttl(mut self, ttl_ms: u64) -> Self {
        self.default_ttl_ms = ttl_ms;
        self
    }

    fn cache_path(root: &Path) -> PathBuf {
        root.join(CACHE_DIR).join(CACHE_FILE)
    }

    fn load_entries(root: &Path) -> Result<HashMap<String, CacheEntry>> {
        let path = Self::cache_path(root);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let bytes = std::fs::read(&path)?;
        let persisted: PersistedCache = match serde_json::from_slice(&bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "scan cache is unreadable; starting empty");
                return Ok(HashMap::new());
            }
        };
        if persisted.schema_version != SCHEMA_VERSION {
            debug!(
                found = persisted.schema_version,
                expected = SCHEMA_VERSION,
                "scan cache schema mismatch; starting empty"
            );
            return Ok(HashMap::new());
        }
        Ok(persisted.entries)
    }

    /// Compose the content-addressed key for a `(scanner, path, content)` triple.
    pub fn key(scanner_id: &str, file_path: &Path, file_bytes: &[u8]) -> String {
        format!(
            "{scanner_id}:{}:{}",
            hash12(file_path.to_string_lossy().as_bytes()),
            sha256_hex(file_bytes)
        )
    }

    /// Look up cached findings. Misses on absence or expiry; an expired entry
    /// is evicted on the spot.
    pub fn lookup(
        &self,
        scanner_id: &str,
        file_path: &Path,
        file_bytes: &[u8],
    ) -> Option<Vec<Finding>> {
        let key = Self::key(scanner_id, file_path, file_bytes);
        let now = Utc::now();
        let mut state = self.state.lock().expect("cache mutex poisoned");

        let hit = state
            .entries
            .get(&key)
            .map(|entry| (entry.is_expired(now), entry.findings.clone()));
        match hit {
            Some((true, _)) => {
                state.entries.remove(&key);
                state.stats.evictions += 1;
                state.stats.misses += 1;
                state.dirty = true;
                None
            }
            Some((false, findings)) => {
                state.stats.hits += 1;
                Some(findings)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Insert findings for a `(scanner, path, content)` triple.
    pub fn put(
        &self,
        scanner_id: &str,
        file_path: &Path,
        file_bytes: &[u8],
        findings: Vec<Finding>,
        ttl_ms: Option<u64>,
    ) {
        let key = Self::key(scanner_id, file_path, file_bytes);
        let entry = CacheEntry {
            scanner_id: scanner_id.to_string(),
            file_path: file_path.to_path_buf(),
            content_hash: sha256_hex(file_bytes),
            findings,
            cached_at: Utc::now(),
            ttl_ms: ttl_ms.unwrap_or(self.default_ttl_ms),
        };

        let mut state = self.state.lock().expect("cache mutex poisoned");
        state.entries.insert(key, entry);
        state.dirty = true;

        // Oldest-first eviction beyond capacity.
        while state.entries.len() > self.max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    state.entries.remove(&key);
                    state.stats.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drop every entry for one scanner.
    pub fn invalidate_scanner(&self, scanner_id: &str) {
        let mut state = self.state.lock().expect("cache mutex poisoned");
        let before = state.entries.len();
        state.entries.retain(|_, e| e.scanner_id != scanner_id);
        let removed = before - state.entries.len();
        if removed > 0 {
            state.stats.evictions += removed as u64;
            state.dirty = true;
        }
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock().expect("cache mutex poisoned");
        let removed = state.entries.len();
        state.entries.clear();
        if removed > 0 {
            state.stats.evictions += removed as u64;
            state.dirty = true;
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().expect("cache mutex poisoned").stats
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.lock().expect("cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist to disk if dirty. Atomic rewrite of the whole document.
    pub fn flush(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().expect("cache mutex poisoned");
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.entries.clone()
        };

        let dir = self.root.join(CACHE_DIR);
        std::fs::create_dir_all(&dir)?;

        let persisted = PersistedCache {
            schema_version: SCHEMA_VERSION,
            entries: snapshot,
        };
        let json = serde_json::to_vec_pretty(&persisted)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.persist(dir.join(CACHE_FILE))
            .map_err(|e| HydraError::StorageError(format!("cache rename failed: {}", e.error)))?;
        Ok(())
    }
}
