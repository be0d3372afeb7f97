//! Daemon configuration and startup validation.
//!
//! Insecure defaults are opt-in: without a bearer token and a path
//! allow-list, startup fails unless `HYDRA_ALLOW_INSECURE_DEFAULTS=1` is set
//! explicitly.

use std::path::{Path, PathBuf};

use tracing::warn;

pub const ENV_DAEMON_TOKEN: &str = "HYDRA_DAEMON_TOKEN";
pub const ENV_ALLOWED_PATHS: &str = "HYDRA_ALLOWED_PATHS";
pub const ENV_ALLOW_INSECURE_DEFAULTS: &str = "HYDRA_ALLOW_INSECURE_DEFAULTS";

/// Errors that abort daemon startup.
#[derive(Debug, thiserror::Error)]
pub enum DaemonConfigError {
    #[error("no auth token configured; set {ENV_DAEMON_TOKEN} or opt into \
             {ENV_ALLOW_INSECURE_DEFAULTS}=1")]
    MissingToken,

    #[error("no path allow-list configured; set {ENV_ALLOWED_PATHS} or opt into \
             {ENV_ALLOW_INSECURE_DEFAULTS}=1")]
    MissingAllowList,

    #[error("allow-list entry is not a directory: {0}")]
    InvalidAllowListEntry(String),
}

/// Validated daemon configuration.
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub token: Option<String>,
    /// Canonicalized directories a target may live under.
    pub allowed_paths: Vec<PathBuf>,
    pub allow_insecure: bool,
    pub max_stored_runs: usize,
}

impl DaemonConfig {
    /// Read and validate the environment. Fails fast before binding.
    pub fn from_env() -> Result<Self, DaemonConfigError> {
        let token = std::env::var(ENV_DAEMON_TOKEN).ok().filter(|t| !t.is_empty());
        let allow_insecure = std::env::var(ENV_ALLOW_INSECURE_DEFAULTS)
            .map(|v| v == "1")
            .unwrap_or(false);

        let mut allowed_paths = Vec::new();
        if let Ok(raw) = std::env::var(ENV_ALLOWED_PATHS) {
            for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let canonical = Path::new(entry)
                    .canonicalize()
                    .map_err(|_| DaemonConfigError::InvalidAllowListEntry(entry.to_string()))?;
                if !canonical.is_dir() {
                    return Err(DaemonConfigError::InvalidAllowListEntry(entry.to_string()));
                }
                allowed_paths.push(canonical);
            }
        }

        let config = Self {
            token,
            allowed_paths,
            allow_insecure,
            max_stored_runs: crate::runs::MAX_STORED_RUNS,
        };
        config.validate()?;
        Ok(config)
    }

    /// Startup safety rules.
    pub fn validate(&self) -> Result<(), DaemonConfigError> {
        if self.token.is_none() {
            if !self.allow_insecure {
                return Err(DaemonConfigError::MissingToken);
            }
            warn!("daemon running without auth; insecure defaults were explicitly enabled");
        }
        if self.allowed_paths.is_empty() {
            if !self.allow_insecure {
                return Err(DaemonConfigError::MissingAllowList);
            }
            warn!("daemon running without a path allow-list; all targets accepted");
        }
        Ok(())
    }

    /// Whether a canonicalized target is equal to, or strictly under, an
    /// allow-list entry. An empty allow-list (insecure mode) accepts all.
    pub fn is_path_allowed(&self, canonical: &Path) -> bool {
        if self.allowed_paths.is_empty() {
            return true;
        }
        self.allowed_paths
            .iter()
            .any(|allowed| canonical.starts_with(allowed))
    }
}
