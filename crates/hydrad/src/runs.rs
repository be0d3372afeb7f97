//! Bounded in-memory run history.
//!
//! Run records are process-local by design: the daemon keeps a bounded ring
//! and offers no durable persistence. Oldest records are evicted once the
//! ring exceeds its capacity.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hydra_core::domain::report::ScanReport;
use hydra_core::domain::target::ScanMode;

/// Default ring capacity.
pub const MAX_STORED_RUNS: usize = 200;

/// Lifecycle of one daemon-tracked run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// One end-to-end pipeline invocation tracked by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub trigger: String,
    pub target_path: PathBuf,
    pub mode: ScanMode,
    pub base_ref: Option<String>,
    pub head_ref: Option<String>,
    pub changed_files: Option<Vec<String>>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<ScanReport>,
}

impl RunRecord {
    pub fn queued(
        trigger: impl Into<String>,
        target_path: PathBuf,
        mode: ScanMode,
        base_ref: Option<String>,
        head_ref: Option<String>,
        changed_files: Option<Vec<String>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger: trigger.into(),
            target_path,
            mode,
            base_ref,
            head_ref,
            changed_files,
            status: RunStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }
}

/// Bounded run history with newest-first listing.
pub struct RunStore {
    max: usize,
    runs: Mutex<Vec<RunRecord>>,
}

impl RunStore {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Insert a record, evicting oldest-first beyond capacity.
    pub fn insert(&self, record: RunRecord) {
        let mut runs = self.runs.lock().expect("run store mutex poisoned");
        runs.push(record);
        while runs.len() > self.max {
            runs.remove(0);
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<RunRecord> {
        self.runs
            .lock()
            .expect("run store mutex poisoned")
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<RunRecord> {
        let runs = self.runs.lock().expect("run store mutex poisoned");
        runs.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().expect("run store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a mutation to the record with `id`, if it is still in the ring.
    pub fn update(&self, id: &Uuid, mutate: impl FnOnce(&mut RunRecord)) {
        let mut runs = self.runs.lock().expect("run store mutex poisoned");
        if let Some(record) = runs.iter_mut().find(|r| &r.id == id) {
            mutate(record);
        }
    }

    pub fn mark_running(&self, id: &Uuid) {
        self.update(id, |r| {
            r.status = RunStatus::Running;
            r.started_at = Some(Utc::now());
        });
    }

    pub fn mark_completed(&self, id: &Uuid, result: ScanReport) {
        self.update(id, |r| {
            r.status = RunStatus::Completed;
            r.completed_at = Some(Utc::now());
            r.result = Some(result);
        });
    }

    pub fn mark_failed(&self, id: &Uuid, error: String) {
        self.update(id, |r| {
            r.status = RunStatus::Failed;
            r.completed_at = Some(Utc::now());
            r.error = Some(error);
        });
    }
}
