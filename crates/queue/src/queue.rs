//! The single-active-job queue engine.
//!
//! [`JobQueue`] serializes generation work: submissions enter a FIFO
//! admission queue, a background worker loop claims and runs at most
//! one routine at a time, and every job stays queryable (and
//! cancellable) by id for the lifetime of the engine.
//!
//! Lifecycle events are broadcast via a [`tokio::sync::broadcast`]
//! channel. Call [`JobQueue::subscribe`] to receive them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use kiln_core::params::GenerationParams;
use kiln_core::types::JobId;

use crate::config::QueueConfig;
use crate::error::LoopError;
use crate::events::QueueEvent;
use crate::job::{Job, JobProgress, JobStatus};
use crate::runner::QueueRunner;
use crate::snapshot;
use crate::stream::{job_stream, ControlSignal, JobStream, WorkerEvent};
use crate::worker::WorkerRoutine;

/// Timeout for the worker loop task to exit during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Stream halves handed to the worker loop exactly once, at claim time.
pub(crate) struct RunIo {
    pub(crate) stream: JobStream,
    pub(crate) event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// A claimed run, ready for the worker loop to execute.
pub(crate) struct ClaimedRun {
    pub(crate) id: JobId,
    pub(crate) params: GenerationParams,
    pub(crate) stream: JobStream,
    pub(crate) event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Internal bookkeeping for one tracked job.
struct TrackedJob {
    job: Job,
    /// Queue-side control sender; signals a running routine to stop.
    control_tx: mpsc::UnboundedSender<ControlSignal>,
    run_io: Option<RunIo>,
    /// Failure reported by the routine task before its stream closed.
    routine_error: Option<String>,
}

/// Mutable queue state behind one lock.
#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, TrackedJob>,
    admission: VecDeque<JobId>,
    /// Id of the job currently claimed by the worker loop.
    current: Option<JobId>,
    /// Single-flight latch; set from claim until finalization.
    processing: bool,
    next_seq: u64,
}

impl QueueState {
    /// Queue position: `0` while running, `1 + earlier pending` while
    /// pending, `None` otherwise. Earlier means a strictly smaller
    /// `(created_at, seq)` pair.
    fn position_of(&self, id: JobId) -> Option<usize> {
        let subject = self.jobs.get(&id)?;
        match subject.job.status {
            JobStatus::Running => Some(0),
            JobStatus::Pending => {
                let key = (subject.job.created_at, subject.job.seq);
                let earlier = self
                    .jobs
                    .values()
                    .filter(|t| t.job.status == JobStatus::Pending)
                    .filter(|t| (t.job.created_at, t.job.seq) < key)
                    .count();
                Some(1 + earlier)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Single-active-job work queue.
///
/// Created via [`JobQueue::start`] (engine plus worker loop) or
/// [`JobQueue::new`] (table only, for hosts that drive admission
/// themselves). The returned `Arc` can be cheaply cloned into host
/// tasks.
pub struct JobQueue {
    state: Mutex<QueueState>,
    worker: RwLock<Option<Arc<dyn WorkerRoutine>>>,
    config: QueueConfig,
    event_tx: broadcast::Sender<QueueEvent>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
    runner_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JobQueue {
    /// Create an engine without a worker loop.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            worker: RwLock::new(None),
            config,
            event_tx,
            cancel: CancellationToken::new(),
            runner_handle: Mutex::new(None),
        })
    }

    /// Create an engine and spawn its worker loop.
    pub async fn start(config: QueueConfig) -> Arc<Self> {
        let queue = Self::new(config);

        let runner = QueueRunner::new(Arc::clone(&queue));
        let handle = tokio::spawn(runner.run(queue.cancel.clone()));
        *queue.runner_handle.lock().await = Some(handle);

        tracing::info!("Job queue started");
        queue
    }

    /// Install (or replace) the routine used for subsequent runs.
    ///
    /// Jobs claimed while no routine is installed fail with
    /// [`crate::ERR_ROUTINE_NOT_CONFIGURED`].
    pub async fn set_worker(&self, worker: Arc<dyn WorkerRoutine>) {
        *self.worker.write().await = Some(worker);
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Gracefully shut down the worker loop.
    ///
    /// Cancels the master token, then waits up to 5 seconds for the
    /// loop task to exit. Pending jobs stay pending; a routine running
    /// at shutdown is abandoned, not cancelled.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job queue");
        self.cancel.cancel();

        let handle = self.runner_handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Worker loop did not stop within the shutdown timeout");
            }
        }

        tracing::info!("Job queue shut down complete");
    }

    // -----------------------------------------------------------------------
    // Submission and queries
    // -----------------------------------------------------------------------

    /// Submit a generation request.
    ///
    /// Builds the job (deriving its display label and preview
    /// thumbnail), appends it to the admission queue, publishes
    /// [`QueueEvent::JobSubmitted`] and schedules a snapshot write.
    /// Submission itself cannot fail.
    pub async fn submit(self: &Arc<Self>, params: GenerationParams) -> JobId {
        let (stream, ends) = job_stream();

        let (id, generation_type) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let seq = state.next_seq;
            state.next_seq += 1;

            let job = Job::new(params, seq);
            let id = job.id;
            let generation_type = job.generation_type.clone();

            state.jobs.insert(
                id,
                TrackedJob {
                    job,
                    control_tx: ends.control_tx,
                    run_io: Some(RunIo {
                        stream,
                        event_rx: ends.event_rx,
                    }),
                    routine_error: None,
                },
            );
            state.admission.push_back(id);

            (id, generation_type)
        };

        tracing::info!(job_id = %id, generation_type = %generation_type, "Job submitted");
        self.publish(QueueEvent::JobSubmitted {
            job_id: id,
            generation_type,
        });
        self.schedule_snapshot();

        id
    }

    /// Point-in-time copy of a tracked job.
    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.state.lock().await.jobs.get(&id).map(|t| t.job.clone())
    }

    /// Copies of all tracked jobs, in unspecified order.
    pub async fn jobs(&self) -> Vec<Job> {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .map(|t| t.job.clone())
            .collect()
    }

    /// Queue position for a job: `0` while running, `1 + earlier
    /// pending` while pending, `None` once terminal or for unknown ids.
    pub async fn position(&self, id: JobId) -> Option<usize> {
        self.state.lock().await.position_of(id)
    }

    /// Cancel a job.
    ///
    /// Pending jobs are cancelled in place and never run. Running jobs
    /// flip to cancelled immediately and the routine is asked to stop
    /// (best-effort); the worker loop stops consuming its events on the
    /// next re-check. Returns `false` for terminal or unknown ids.
    pub async fn cancel(&self, id: JobId) -> bool {
        let control_tx = {
            let mut state = self.state.lock().await;
            let Some(tracked) = state.jobs.get_mut(&id) else {
                return false;
            };

            match tracked.job.status {
                JobStatus::Pending => {
                    tracked.job.status = JobStatus::Cancelled;
                    tracked.job.completed_at = Some(chrono::Utc::now());
                    None
                }
                JobStatus::Running => {
                    tracked.job.status = JobStatus::Cancelled;
                    tracked.job.completed_at = Some(chrono::Utc::now());
                    Some(tracked.control_tx.clone())
                }
                _ => return false,
            }
        };

        if let Some(control_tx) = control_tx {
            // The routine may have already returned; a dead receiver is fine.
            let _ = control_tx.send(ControlSignal::Stop);
        }

        tracing::info!(job_id = %id, "Job cancelled");
        self.publish(QueueEvent::JobCancelled { job_id: id });
        true
    }

    /// Record the latest progress for a job and publish
    /// [`QueueEvent::JobProgress`]. Unknown ids are a silent no-op.
    ///
    /// Normally driven by the worker loop; also usable by hosts for
    /// out-of-band status lines.
    pub async fn update_progress(&self, id: JobId, progress: JobProgress) {
        let description = progress.description.clone();

        let known = {
            let mut state = self.state.lock().await;
            match state.jobs.get_mut(&id) {
                Some(tracked) => {
                    tracked.job.progress = Some(progress);
                    true
                }
                None => false,
            }
        };

        if known {
            self.publish(QueueEvent::JobProgress {
                job_id: id,
                description,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot persistence
    // -----------------------------------------------------------------------

    /// Write the queue snapshot now.
    ///
    /// Collects under the lock, serializes and writes outside it.
    /// Failures are logged, never returned.
    pub async fn save_snapshot(&self) {
        let entries = {
            let state = self.state.lock().await;
            state
                .jobs
                .values()
                .map(|t| (t.job.clone(), state.position_of(t.job.id)))
                .collect::<Vec<_>>()
        };

        let document = snapshot::snapshot_document(&entries);
        snapshot::write_snapshot(&self.config.snapshot_path, &document).await;
    }

    fn schedule_snapshot(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.save_snapshot().await });
    }

    // -----------------------------------------------------------------------
    // Worker loop internals
    // -----------------------------------------------------------------------

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) async fn worker(&self) -> Option<Arc<dyn WorkerRoutine>> {
        self.worker.read().await.clone()
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        // A send error only means there are no subscribers right now.
        let _ = self.event_tx.send(event);
    }

    pub(crate) async fn job_status(&self, id: JobId) -> Option<JobStatus> {
        self.state.lock().await.jobs.get(&id).map(|t| t.job.status)
    }

    /// Claim the oldest admissible job, if any.
    ///
    /// Skips ids that were cancelled (or vanished) while queued. Does
    /// nothing while the single-flight latch is set.
    pub(crate) async fn claim_next(&self) -> Result<Option<ClaimedRun>, LoopError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.processing {
            return Ok(None);
        }

        loop {
            let Some(id) = state.admission.pop_front() else {
                return Ok(None);
            };

            let Some(tracked) = state.jobs.get_mut(&id) else {
                tracing::warn!(job_id = %id, "Queued job vanished from the table");
                continue;
            };
            if tracked.job.status != JobStatus::Pending {
                // Cancelled while queued; never runs.
                continue;
            }

            let Some(run_io) = tracked.run_io.take() else {
                return Err(LoopError::StreamMissing(id));
            };

            tracked.job.status = JobStatus::Running;
            tracked.job.started_at = Some(chrono::Utc::now());
            let params = tracked.job.params.clone();

            state.current = Some(id);
            state.processing = true;

            return Ok(Some(ClaimedRun {
                id,
                params,
                stream: run_io.stream,
                event_rx: run_io.event_rx,
            }));
        }
    }

    /// Record an artifact reference reported by the routine.
    pub(crate) async fn record_artifact(&self, id: JobId, reference: String) {
        let mut state = self.state.lock().await;
        if let Some(tracked) = state.jobs.get_mut(&id) {
            tracked.job.result = Some(reference);
        }
    }

    /// Stash a routine failure so the drain can attribute the closed
    /// stream to it.
    pub(crate) async fn note_routine_failure(&self, id: JobId, message: String) {
        let mut state = self.state.lock().await;
        if let Some(tracked) = state.jobs.get_mut(&id) {
            tracked.routine_error = Some(message);
        }
    }

    pub(crate) async fn take_routine_failure(&self, id: JobId) -> Option<String> {
        let mut state = self.state.lock().await;
        state
            .jobs
            .get_mut(&id)
            .and_then(|tracked| tracked.routine_error.take())
    }

    /// Apply a run outcome and release the single-flight latch.
    ///
    /// The outcome only lands if the job is still running: a cancel
    /// that won the race (or a vanished entry) leaves the job alone.
    pub(crate) async fn finalize_run(&self, id: JobId, outcome: RunOutcome) {
        let event = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            state.current = None;
            state.processing = false;

            match state.jobs.get_mut(&id) {
                Some(tracked) if tracked.job.status == JobStatus::Running => {
                    let now = chrono::Utc::now();
                    match outcome {
                        RunOutcome::Completed => {
                            tracked.job.status = JobStatus::Completed;
                            tracked.job.completed_at = Some(now);
                            Some(QueueEvent::JobCompleted {
                                job_id: id,
                                result: tracked.job.result.clone(),
                            })
                        }
                        RunOutcome::Failed(message) => {
                            tracked.job.status = JobStatus::Failed;
                            tracked.job.error = Some(message.clone());
                            tracked.job.completed_at = Some(now);
                            Some(QueueEvent::JobFailed {
                                job_id: id,
                                error: message,
                            })
                        }
                        RunOutcome::Cancelled => None,
                    }
                }
                _ => None,
            }
        };

        match &event {
            Some(QueueEvent::JobCompleted { .. }) => {
                tracing::info!(job_id = %id, "Job completed");
            }
            Some(QueueEvent::JobFailed { error, .. }) => {
                tracing::warn!(job_id = %id, error = %error, "Job failed");
            }
            _ => {}
        }
        if let Some(event) = event {
            self.publish(event);
        }
    }

    /// Force-fail a job after a contained loop error, releasing the
    /// latch if the job held it.
    pub(crate) async fn fail_job(&self, id: JobId, message: String) {
        let failed = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            if state.current == Some(id) {
                state.current = None;
                state.processing = false;
            }

            match state.jobs.get_mut(&id) {
                Some(tracked) if tracked.job.status.is_active() => {
                    tracked.job.status = JobStatus::Failed;
                    tracked.job.error = Some(message.clone());
                    tracked.job.completed_at = Some(chrono::Utc::now());
                    true
                }
                _ => false,
            }
        };

        if failed {
            tracing::warn!(job_id = %id, error = %message, "Job failed");
            self.publish(QueueEvent::JobFailed {
                job_id: id,
                error: message,
            });
        }
    }
}

/// How a claimed run ended.
#[derive(Debug)]
pub(crate) enum RunOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
