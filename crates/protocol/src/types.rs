use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "copy")]
    Copy,
    #[serde(rename = "move")]
    Move,
    #[serde(rename = "delete")]
    Delete,
}

/// Lifecycle state of a job.
///
/// `Completed`, `Failed` and `Cancelled` are terminal: once reached,
/// the job never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl JobState {
    /// Returns `true` for completed, failed and cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A tracked background copy/move/delete operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub state: JobState,
    /// Percentage 0-100, non-decreasing while running; 100 iff completed.
    pub progress: u8,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Ephemeral projection of a [`Job`] pushed to observers.
///
/// Never persisted; derived from the job on every emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: String,
    pub state: JobState,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobUpdate {
    /// Projects a job into its observer-facing update.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            state: job.state,
            progress: job.progress,
            error: job.error.clone(),
        }
    }
}
