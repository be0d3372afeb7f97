//! Bounded-concurrency agent dispatcher.
//!
//! Runs a heterogeneous set of agent tasks against one scan target with a
//! semaphore-bounded in-flight set. Start order follows queue order;
//! completion order is whatever it is. Every task settles into a terminal
//! [`AgentRun`] — failures and timeouts are captured, never propagated, and
//! a timed-out task contributes no findings.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, warn};

use crate::domain::agent_run::{AgentRun, AgentStatus};
use crate::domain::error::{HydraError, Result};
use crate::domain::finding::Finding;
use crate::domain::target::ScanTarget;
use crate::scanner::AgentTask;

/// Default bound on simultaneously running tasks.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Everything one dispatch produced.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// Findings in task-completion order.
    pub findings: Vec<Finding>,
    /// One record per task, in enqueue order, all terminal.
    pub agent_runs: Vec<AgentRun>,
}

/// Cooperative cancellation handle for a dispatch.
///
/// Cancelling refuses to dequeue further tasks; in-flight tasks settle.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Semaphore-bounded FIFO dispatcher.
pub struct AgentDispatcher {
    max_concurrent: usize,
}

impl AgentDispatcher {
    /// Create a dispatcher. `max_concurrent` must be a positive integer.
    pub fn new(max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(HydraError::InvalidConfig(
                "max concurrent agents must be a positive integer".to_string(),
            ));
        }
        Ok(Self { max_concurrent })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every task to a terminal state and collect findings.
    pub async fn dispatch(
        &self,
        tasks: Vec<Arc<dyn AgentTask>>,
        target: &ScanTarget,
        cancel: Option<CancelToken>,
    ) -> DispatchOutcome {
        let runs: Arc<Mutex<Vec<AgentRun>>> = Arc::new(Mutex::new(
            tasks.iter().map(|t| AgentRun::queued(t.agent_id())).collect(),
        ));
        let findings: Arc<Mutex<Vec<Finding>>> = Arc::new(Mutex::new(Vec::new()));
        let sem = Arc::new(Semaphore::new(self.max_concurrent));

        let mut handles = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.into_iter().enumerate() {
            // Cancellation gate: refuse to dequeue, let in-flight settle.
            if cancel.as_ref().map(CancelToken::is_cancelled) == Some(true) {
                let mut guard = runs.lock().await;
                guard[index].finish(
                    AgentStatus::Failed,
                    None,
                    Some("cancelled before start".to_string()),
                );
                continue;
            }

            // Acquiring here (not inside the spawned task) pins start order
            // to queue order.
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .expect("dispatcher semaphore closed");

            let runs = Arc::clone(&runs);
            let findings = Arc::clone(&findings);
            let target = target.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let agent_id = task.agent_id().to_string();
                let deadline = task.timeout();

                runs.lock().await[index].start();
                debug!(agent_id = %agent_id, "agent task started");

                match tokio::time::timeout(deadline, task.execute(&target)).await {
                    Ok(Ok(task_findings)) => {
                        let count = task_findings.len();
                        findings.lock().await.extend(task_findings);
                        runs.lock().await[index].finish(
                            AgentStatus::Completed,
                            Some(count),
                            None,
                        );
                    }
                    Ok(Err(error)) => {
                        warn!(agent_id = %agent_id, error = %error, "agent task failed");
                        runs.lock().await[index].finish(
                            AgentStatus::Failed,
                            None,
                            Some(error.to_string()),
                        );
                    }
                    Err(_elapsed) => {
                        // Findings from a late task are discarded with it.
                        warn!(
                            agent_id = %agent_id,
                            timeout_ms = deadline.as_millis() as u64,
                            "agent task timed out"
                        );
                        runs.lock().await[index].finish(AgentStatus::TimedOut, None, None);
                    }
                }
            });
            handles.push((index, handle));
        }

        for (index, handle) in handles {
            if handle.await.is_err() {
                // Task panicked: the record never settled inside the task.
                let mut guard = runs.lock().await;
                if !guard[index].status.is_terminal() {
                    guard[index].finish(
                        AgentStatus::Failed,
                        None,
                        Some("agent task panicked".to_string()),
                    );
                }
            }
        }

        let agent_runs = Arc::try_unwrap(runs)
            .map(|m| m.into_inner())
            .unwrap_or_default();
        let findings = Arc::try_unwrap(findings)
            .map(|m| m.into_inner())
            .unwrap_or_default();

        DispatchOutcome {
            findings,
            agent_runs,
        }
    }
}
