//! The narrow contract between the core and its vulnerability detectors.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::finding::Finding;
use crate::domain::target::ScanTarget;

/// Default per-agent deadline.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Deadline for reasoner-backed agents.
pub const LLM_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

/// A pluggable detector: filesystem snapshot in, findings out.
///
/// Implementations must be pure with respect to filesystem contents and
/// surface errors as `Err` — the dispatcher converts them to failed runs.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Stable scanner id, used in finding identity and cache keys.
    fn id(&self) -> &str;

    /// Scan the tree rooted at `root` and return all findings.
    async fn scan(&self, root: &Path) -> anyhow::Result<Vec<Finding>>;
}

/// One executable unit handled by the dispatcher.
#[async_trait]
pub trait AgentTask: Send + Sync {
    fn agent_id(&self) -> &str;

    /// Per-task deadline.
    fn timeout(&self) -> Duration {
        DEFAULT_AGENT_TIMEOUT
    }

    async fn execute(&self, target: &ScanTarget) -> anyhow::Result<Vec<Finding>>;
}

/// Adapter that exposes a [`Scanner`] as an [`AgentTask`].
pub struct ScannerTask {
    scanner: Arc<dyn Scanner>,
    timeout: Duration,
}

impl ScannerTask {
    pub fn new(scanner: Arc<dyn Scanner>, timeout: Duration) -> Self {
        Self { scanner, timeout }
    }
}

#[async_trait]
impl AgentTask for ScannerTask {
    fn agent_id(&self) -> &str {
        self.scanner.id()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, target: &ScanTarget) -> anyhow::Result<Vec<Finding>> {
        self.scanner.scan(&target.root_path).await
    }
}
