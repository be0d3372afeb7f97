//! Sandbox profiles: pre-built images plus their hardening defaults.

use serde::{Deserialize, Serialize};

/// Available sandbox profiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxProfile {
    /// General-purpose exploit execution, no network.
    Generic,
    /// Solana toolchain image sharing the local validator's network namespace.
    Solana,
}

impl SandboxProfile {
    pub fn image(&self) -> &'static str {
        match self {
            SandboxProfile::Generic => "hydra-sandbox-generic",
            SandboxProfile::Solana => "hydra-sandbox-solana",
        }
    }

    pub fn memory_limit(&self) -> &'static str {
        match self {
            SandboxProfile::Generic => "512m",
            SandboxProfile::Solana => "2g",
        }
    }

    pub fn cpu_quota(&self) -> &'static str {
        match self {
            SandboxProfile::Generic => "1",
            SandboxProfile::Solana => "2",
        }
    }

    pub fn network(&self) -> &'static str {
        match self {
            SandboxProfile::Generic => "none",
            SandboxProfile::Solana => "container:hydra-validator",
        }
    }
}

/// Per-session overrides of the profile defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SandboxOverrides {
    pub memory_limit: Option<String>,
    pub cpu_quota: Option<String>,
    pub network: Option<String>,
}

/// `docker run` arguments for a session container.
///
/// Images run as a non-root user; the root filesystem is read-only with two
/// tmpfs mounts, all capabilities dropped, and no privilege escalation.
pub fn run_args(profile: SandboxProfile, overrides: &SandboxOverrides, name: &str) -> Vec<String> {
    let memory = overrides
        .memory_limit
        .clone()
        .unwrap_or_else(|| profile.memory_limit().to_string());
    let cpus = overrides
        .cpu_quota
        .clone()
        .unwrap_or_else(|| profile.cpu_quota().to_string());
    let network = overrides
        .network
        .clone()
        .unwrap_or_else(|| profile.network().to_string());

    vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--read-only".to_string(),
        "--cap-drop".to_string(),
        "ALL".to_string(),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
        "--network".to_string(),
        network,
        "--pids-limit".to_string(),
        "256".to_string(),
        "--memory".to_string(),
        memory,
        "--cpus".to_string(),
        cpus,
        "--tmpfs".to_string(),
        "/tmp:rw,noexec,nosuid,nodev,size=256m".to_string(),
        "--tmpfs".to_string(),
        "/workspace:rw,noexec,nosuid,nodev,size=256m".to_string(),
        profile.image().to_string(),
        "sleep".to_string(),
        "infinity".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_profile_has_no_network() {
        let args = run_args(SandboxProfile::Generic, &SandboxOverrides::default(), "s1");
        let network_idx = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[network_idx + 1], "none");
        assert!(args.contains(&"hydra-sandbox-generic".to_string()));
    }

    #[test]
    fn solana_profile_joins_validator_namespace() {
        let args = run_args(SandboxProfile::Solana, &SandboxOverrides::default(), "s1");
        assert!(args.contains(&"container:hydra-validator".to_string()));
        assert!(args.contains(&"hydra-sandbox-solana".to_string()));
    }

    #[test]
    fn hardening_flags_always_present() {
        let args = run_args(SandboxProfile::Generic, &SandboxOverrides::default(), "s1");
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.contains(&"--cap-drop".to_string()));
        assert!(args.contains(&"no-new-privileges".to_string()));
        assert_eq!(
            args.iter().filter(|a| a.as_str() == "--tmpfs").count(),
            2
        );
        assert!(args
            .iter()
            .filter(|a| a.contains("noexec,nosuid,nodev"))
            .count()
            >= 2);
    }

    #[test]
    fn overrides_replace_profile_defaults() {
        let overrides = SandboxOverrides {
            memory_limit: Some("128m".to_string()),
            cpu_quota: Some("0.5".to_string()),
            network: None,
        };
        let args = run_args(SandboxProfile::Generic, &overrides, "s1");
        assert!(args.contains(&"128m".to_string()));
        assert!(args.contains(&"0.5".to_string()));
    }
}
