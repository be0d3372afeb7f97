//! Error types for the sandbox module.

/// Errors produced by the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("container runtime unavailable")]
    RuntimeUnavailable,

    #[error("sandbox image not built: {image}")]
    ImageMissing { image: String },

    #[error("container runtime command timed out after {limit_ms}ms")]
    CommandTimeout { limit_ms: u64 },

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
