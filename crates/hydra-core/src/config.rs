//! Configuration: defaults, the optional `.hydra/config.toml`, and the
//! environment, in that order of precedence.
//!
//! Invalid environment values are rejected with a typed error rather than
//! silently falling back to defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{HydraError, Result};
use crate::sandbox::SandboxProfile;

pub const ENV_MAX_CONCURRENT_AGENTS: &str = "HYDRA_MAX_CONCURRENT_AGENTS";
pub const ENV_AGENT_TIMEOUT_MS: &str = "HYDRA_AGENT_TIMEOUT_MS";

const CONFIG_FILE: &str = ".hydra/config.toml";

/// Effective configuration for one orchestrator instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HydraConfig {
    pub max_concurrent_agents: usize,
    pub agent_timeout_ms: u64,
    pub llm_agent_timeout_ms: u64,
    pub min_uncorroborated_confidence: u8,
    pub min_adversarial_confidence: u8,
    pub adversarial_concurrency: usize,
    pub patch_concurrency: usize,
    pub cache_ttl_ms: u64,
    pub cache_max_entries: usize,
    pub sandbox_profile: SandboxProfile,
}

impl Default for HydraConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 3,
            agent_timeout_ms: 90_000,
            llm_agent_timeout_ms: 300_000,
            min_uncorroborated_confidence: 80,
            min_adversarial_confidence: 50,
            adversarial_concurrency: 2,
            patch_concurrency: 2,
            cache_ttl_ms: 24 * 60 * 60 * 1000,
            cache_max_entries: 5_000,
            sandbox_profile: SandboxProfile::Generic,
        }
    }
}

/// Partial overlay read from `.hydra/config.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    max_concurrent_agents: Option<usize>,
    agent_timeout_ms: Option<u64>,
    llm_agent_timeout_ms: Option<u64>,
    min_uncorroborated_confidence: Option<u8>,
    min_adversarial_confidence: Option<u8>,
    adversarial_concurrency: Option<usize>,
    patch_concurrency: Option<usize>,
    cache_ttl_ms: Option<u64>,
    cache_max_entries: Option<usize>,
    sandbox_profile: Option<SandboxProfile>,
}

fn positive_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr + PartialOrd + Default,
{
    match std::env::var(name) {
        Ok(raw) => {
            let value: T = raw.parse().map_err(|_| {
                HydraError::InvalidConfig(format!("{name} must be a positive integer, got {raw:?}"))
            })?;
            if value <= T::default() {
                return Err(HydraError::InvalidConfig(format!(
                    "{name} must be a positive integer, got {raw:?}"
                )));
            }
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

impl HydraConfig {
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    /// Defaults <- config file <- environment.
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let path = Self::config_path(root);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: ConfigFile = toml::from_str(&raw)
                .map_err(|e| HydraError::InvalidConfig(format!("{}: {e}", path.display())))?;
            config.apply(file);
        }

        if let Some(v) = positive_env::<usize>(ENV_MAX_CONCURRENT_AGENTS)? {
            config.max_concurrent_agents = v;
        }
        if let Some(v) = positive_env::<u64>(ENV_AGENT_TIMEOUT_MS)? {
            config.agent_timeout_ms = v;
        }

        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        if let Some(v) = file.max_concurrent_agents {
            self.max_concurrent_agents = v;
        }
        if let Some(v) = file.agent_timeout_ms {
            self.agent_timeout_ms = v;
        }
        if let Some(v) = file.llm_agent_timeout_ms {
            self.llm_agent_timeout_ms = v;
        }
        if let Some(v) = file.min_uncorroborated_confidence {
            self.min_uncorroborated_confidence = v;
        }
        if let Some(v) = file.min_adversarial_confidence {
            self.min_adversarial_confidence = v;
        }
        if let Some(v) = file.adversarial_concurrency {
            self.adversarial_concurrency = v;
        }
        if let Some(v) = file.patch_concurrency {
            self.patch_concurrency = v;
        }
        if let Some(v) = file.cache_ttl_ms {
            self.cache_ttl_ms = v;
        }
        if let Some(v) = file.cache_max_entries {
            self.cache_max_entries = v;
        }
        if let Some(v) = file.sandbox_profile {
            self.sandbox_profile = v;
        }
    }

    /// Effective config as TOML, for `config --show`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HydraError::InvalidConfig(format!("config serialization: {e}")))
    }

    /// Write the defaults to `.hydra/config.toml`, for `config --init`.
    pub fn init_file(root: &Path) -> Result<PathBuf> {
        let path = Self::config_path(root);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, Self::default().to_toml()?)?;
        Ok(path)
    }

    /// Rewrite one key in the config file, for `config --set KEY=VAL`.
    pub fn set_key(root: &Path, key: &str, value: &str) -> Result<()> {
        let path = Self::config_path(root);
        let mut doc: toml::Table = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw)
                .map_err(|e| HydraError::InvalidConfig(format!("{}: {e}", path.display())))?
        } else {
            toml::Table::new()
        };

        // Validate by round-tripping through the overlay shape.
        let parsed: toml::Value = value
            .parse::<i64>()
            .map(toml::Value::Integer)
            .unwrap_or_else(|_| toml::Value::String(value.to_string()));
        doc.insert(key.to_string(), parsed);
        let as_string = toml::to_string_pretty(&doc)
            .map_err(|e| HydraError::InvalidConfig(format!("config serialization: {e}")))?;
        let _: ConfigFile = toml::from_str(&as_string)
            .map_err(|e| HydraError::InvalidConfig(format!("unknown or invalid key {key}: {e}")))?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, as_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; serialize them.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn defaults_match_contract() {
        let c = HydraConfig::default();
        assert_eq!(c.max_concurrent_agents, 3);
        assert_eq!(c.agent_timeout_ms, 90_000);
        assert_eq!(c.llm_agent_timeout_ms, 300_000);
        assert_eq!(c.min_uncorroborated_confidence, 80);
        assert_eq!(c.min_adversarial_confidence, 50);
        assert_eq!(c.adversarial_concurrency, 2);
        assert_eq!(c.patch_concurrency, 2);
        assert_eq!(c.cache_max_entries, 5_000);
    }

    #[test]
    fn file_overlays_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(ENV_MAX_CONCURRENT_AGENTS);
        std::env::remove_var(ENV_AGENT_TIMEOUT_MS);

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".hydra")).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "max_concurrent_agents = 7\ncache_max_entries = 100\n",
        )
        .unwrap();

        let c = HydraConfig::load(dir.path()).unwrap();
        assert_eq!(c.max_concurrent_agents, 7);
        assert_eq!(c.cache_max_entries, 100);
        assert_eq!(c.agent_timeout_ms, 90_000);
    }

    #[test]
    fn env_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".hydra")).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "max_concurrent_agents = 7\n").unwrap();

        std::env::set_var(ENV_MAX_CONCURRENT_AGENTS, "5");
        let c = HydraConfig::load(dir.path()).unwrap();
        std::env::remove_var(ENV_MAX_CONCURRENT_AGENTS);

        assert_eq!(c.max_concurrent_agents, 5);
    }

    #[test]
    fn invalid_env_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();

        std::env::set_var(ENV_MAX_CONCURRENT_AGENTS, "0");
        assert!(HydraConfig::load(dir.path()).is_err());

        std::env::set_var(ENV_MAX_CONCURRENT_AGENTS, "three");
        assert!(HydraConfig::load(dir.path()).is_err());

        std::env::remove_var(ENV_MAX_CONCURRENT_AGENTS);
    }

    #[test]
    fn init_show_set_round_trip() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(ENV_MAX_CONCURRENT_AGENTS);
        std::env::remove_var(ENV_AGENT_TIMEOUT_MS);

        let dir = tempfile::tempdir().unwrap();
        let path = HydraConfig::init_file(dir.path()).unwrap();
        assert!(path.exists());

        HydraConfig::set_key(dir.path(), "patch_concurrency", "4").unwrap();
        let c = HydraConfig::load(dir.path()).unwrap();
        assert_eq!(c.patch_concurrency, 4);

        let shown = c.to_toml().unwrap();
        assert!(shown.contains("patch_concurrency = 4"));
    }

    #[test]
    fn set_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HydraConfig::set_key(dir.path(), "not_a_knob", "1").is_err());
    }
}
