//! Domain-level error taxonomy for Hydra.

/// Hydra domain errors.
#[derive(Debug, thiserror::Error)]
pub enum HydraError {
    #[error("invalid scan target: {0}")]
    InvalidTarget(String),

    #[error("invalid diff refs: {0}")]
    InvalidDiffRefs(String),

    #[error("unknown vulnerability class: {0}")]
    UnknownVulnClass(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Hydra domain operations.
pub type Result<T> = std::result::Result<T, HydraError>;
