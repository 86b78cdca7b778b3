use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wharf_protocol::types::{Job, JobKind, JobState, JobUpdate};
use wharf_vfs::Vfs;

use crate::store::JobStore;
use crate::worker::{execute, Outcome};
use crate::JobError;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed worker pool size.
    pub workers: usize,
    /// Bounded queue depth; submission beyond it fails fast.
    pub queue_depth: usize,
    /// Transfer buffer size for file copies.
    pub copy_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 64,
            copy_buffer: 64 * 1024,
        }
    }
}

/// Callback invoked with every job state/progress transition.
pub type UpdatePublisher = Box<dyn Fn(JobUpdate) + Send + Sync>;

/// Accepts job requests and dispatches them to a bounded pool of
/// workers. Never blocks the submitter on execution.
pub struct Scheduler {
    store: Arc<JobStore>,
    queue: mpsc::Sender<String>,
    publisher: Arc<UpdatePublisher>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Spawns the worker pool and returns the scheduler handle.
    pub fn new(
        config: SchedulerConfig,
        vfs: Arc<dyn Vfs>,
        publisher: UpdatePublisher,
    ) -> Arc<Self> {
        let store = Arc::new(JobStore::new());
        let (tx, rx) = mpsc::channel::<String>(config.queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let publisher: Arc<UpdatePublisher> = Arc::new(publisher);
        let shutdown = CancellationToken::new();

        for worker_id in 0..config.workers {
            let store = Arc::clone(&store);
            let vfs = Arc::clone(&vfs);
            let publisher = Arc::clone(&publisher);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            let copy_buffer = config.copy_buffer;
            tokio::spawn(async move {
                loop {
                    let job_id = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        id = async { rx.lock().await.recv().await } => match id {
                            Some(id) => id,
                            None => break,
                        },
                    };
                    // Filesystem I/O runs on the blocking pool, never
                    // on a runtime thread: the hub loop and socket
                    // pumps must stay scheduled while jobs execute.
                    let job_store = Arc::clone(&store);
                    let job_vfs = Arc::clone(&vfs);
                    let job_publisher = Arc::clone(&publisher);
                    let joined = tokio::task::spawn_blocking(move || {
                        run_job(&job_store, job_vfs.as_ref(), &job_publisher, &job_id, copy_buffer);
                    })
                    .await;
                    if let Err(e) = joined {
                        tracing::error!("job task panicked: {e}");
                    }
                }
                tracing::debug!(worker_id, "job worker stopped");
            });
        }

        Arc::new(Self {
            store,
            queue: tx,
            publisher,
            shutdown,
        })
    }

    /// Validates and enqueues a job; returns it in `pending` state.
    pub fn submit(
        &self,
        kind: JobKind,
        source_path: &str,
        dest_path: Option<&str>,
    ) -> Result<Job, JobError> {
        if source_path.is_empty() {
            return Err(JobError::EmptySourcePath);
        }
        match kind {
            JobKind::Copy | JobKind::Move => {
                if dest_path.is_none_or(str::is_empty) {
                    return Err(JobError::MissingDestPath);
                }
            }
            JobKind::Delete => {}
        }

        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            state: JobState::Pending,
            progress: 0,
            source_path: source_path.to_string(),
            dest_path: dest_path.map(String::from),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.store.insert(job.clone(), CancellationToken::new());

        match self.queue.try_send(job.id.clone()) {
            Ok(()) => {
                tracing::info!(job_id = %job.id, kind = ?kind, "job submitted");
                Ok(job)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.store.remove(&job.id);
                Err(JobError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.store.remove(&job.id);
                Err(JobError::ShuttingDown)
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Job, JobError> {
        self.store.get(id).ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// All jobs, most recently created first.
    pub fn list(&self) -> Vec<Job> {
        self.store.list()
    }

    /// Cancels a pending or running job.
    ///
    /// Pending jobs are marked `cancelled` immediately and never begin
    /// execution. Running jobs are signalled cooperatively; the worker
    /// transitions them at the next work-unit boundary.
    pub fn cancel(&self, id: &str) -> Result<(), JobError> {
        let job = self.get(id)?;
        if job.state.is_terminal() {
            return Err(JobError::NotCancellable(id.to_string()));
        }
        if let Some(token) = self.store.cancel_token(id) {
            token.cancel();
        }
        if job.state == JobState::Pending {
            if let Some(updated) = self.store.update(id, |j| j.state = JobState::Cancelled) {
                tracing::info!(job_id = id, "pending job cancelled");
                (self.publisher.as_ref())(JobUpdate::from_job(&updated));
            }
        }
        Ok(())
    }

    /// Stops the worker pool. In-flight jobs stop at their next
    /// work-unit boundary only if individually cancelled; this merely
    /// prevents new dispatch.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Claims and executes one job, pushing every transition through the
/// store and the publisher.
fn run_job(
    store: &JobStore,
    vfs: &dyn Vfs,
    publisher: &Arc<UpdatePublisher>,
    job_id: &str,
    copy_buffer: usize,
) {
    let Some(job) = store.claim(job_id) else {
        // Cancelled (or gone) before a worker got to it.
        return;
    };
    (publisher.as_ref())(JobUpdate::from_job(&job));
    let Some(cancel) = store.cancel_token(job_id) else {
        return;
    };

    // Progress is exactly 100 only once the job is completed, so
    // running reports are capped at 99; the terminal transition
    // carries the 100.
    let mut last_pct = None;
    let mut report = |pct: u8| {
        let pct = pct.min(99);
        if last_pct == Some(pct) {
            return;
        }
        last_pct = Some(pct);
        if let Some(updated) = store.update(job_id, |j| j.progress = pct) {
            (publisher.as_ref())(JobUpdate::from_job(&updated));
        }
    };
    let outcome = execute(&job, vfs, &cancel, copy_buffer, &mut report);

    let updated = match outcome {
        Outcome::Completed => store.update(job_id, |j| {
            j.state = JobState::Completed;
            j.progress = 100;
        }),
        Outcome::Cancelled => store.update(job_id, |j| j.state = JobState::Cancelled),
        Outcome::Failed(cause) => {
            tracing::warn!(job_id, cause = %cause, "job failed");
            store.update(job_id, |j| {
                j.state = JobState::Failed;
                j.error = Some(cause);
            })
        }
    };
    if let Some(job) = updated {
        // Exactly one terminal update per job.
        (publisher.as_ref())(JobUpdate::from_job(&job));
    }
}
