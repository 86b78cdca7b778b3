use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use wharf_protocol::types::{Job, JobState};

struct JobRecord {
    job: Job,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    /// Ids in creation order; `list` walks it in reverse.
    order: Vec<String>,
}

/// Source of truth for job state.
///
/// Safe for simultaneous reads from the REST surface while a single
/// worker mutates any one job. Terminal jobs are immutable: updates
/// against them are silently ignored.
#[derive(Default)]
pub struct JobStore {
    inner: RwLock<Inner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly created job with its cancellation token.
    pub fn insert(&self, job: Job, cancel: CancellationToken) {
        let mut inner = self.inner.write().unwrap();
        inner.order.push(job.id.clone());
        inner.records.insert(job.id.clone(), JobRecord { job, cancel });
    }

    /// Drops a job entirely (submission rollback when the queue is full).
    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.records.remove(id);
        inner.order.retain(|j| j != id);
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        let inner = self.inner.read().unwrap();
        inner.records.get(id).map(|r| r.job.clone())
    }

    /// All jobs, most recently created first.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.inner.read().unwrap();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.records.get(id).map(|r| r.job.clone()))
            .collect()
    }

    pub fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        let inner = self.inner.read().unwrap();
        inner.records.get(id).map(|r| r.cancel.clone())
    }

    /// Applies `f` to a non-terminal job and returns the updated copy.
    ///
    /// Returns `None` if the job is unknown or already terminal.
    /// Progress can only move forward.
    pub fn update<F>(&self, id: &str, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut inner = self.inner.write().unwrap();
        let record = inner.records.get_mut(id)?;
        if record.job.state.is_terminal() {
            return None;
        }
        let before = record.job.progress;
        f(&mut record.job);
        if record.job.progress < before {
            record.job.progress = before;
        }
        if record.job.state.is_terminal() && record.job.completed_at.is_none() {
            record.job.completed_at = Some(Utc::now());
        }
        Some(record.job.clone())
    }

    /// Claims a pending job for execution: pending -> running.
    ///
    /// Returns `None` when the job was cancelled (or otherwise left
    /// `pending`) before a worker got to it.
    pub fn claim(&self, id: &str) -> Option<Job> {
        let mut inner = self.inner.write().unwrap();
        let record = inner.records.get_mut(id)?;
        if record.job.state != JobState::Pending {
            return None;
        }
        record.job.state = JobState::Running;
        record.job.started_at = Some(Utc::now());
        Some(record.job.clone())
    }
}
