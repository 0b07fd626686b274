//! Single-flight worker loop.
//!
//! A single long-lived task polls the admission queue, claims the
//! oldest pending job, invokes the routine, and drains its event
//! stream to a terminal condition. The tick body is a containment
//! boundary: a failure is logged, the claimed job is force-failed, and
//! the loop pauses briefly before serving the next job. Nothing
//! escapes the loop task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kiln_core::types::JobId;

use crate::error::LoopError;
use crate::events::QueueEvent;
use crate::job::JobStatus;
use crate::queue::{ClaimedRun, JobQueue, RunOutcome};
use crate::stream::WorkerEvent;

/// Error recorded on a job claimed while no routine is installed.
pub const ERR_ROUTINE_NOT_CONFIGURED: &str = "Worker routine not configured";

/// Error recorded when the event stream closes without a terminal
/// event or a reported routine failure.
pub const ERR_INTERRUPTED: &str = "Job processing was interrupted";

/// Background worker loop for a [`JobQueue`].
pub(crate) struct QueueRunner {
    queue: Arc<JobQueue>,
    poll_interval: Duration,
    drain_interval: Duration,
    failure_pause: Duration,
}

impl QueueRunner {
    pub(crate) fn new(queue: Arc<JobQueue>) -> Self {
        let config = queue.config();
        let (poll_interval, drain_interval, failure_pause) = (
            config.poll_interval,
            config.drain_interval,
            config.failure_pause,
        );

        Self {
            queue,
            poll_interval,
            drain_interval,
            failure_pause,
        }
    }

    /// Run the loop until the cancellation token is triggered.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Worker loop started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Worker loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_next(&cancel).await {
                        tracing::error!(error = %e, "Worker loop cycle failed");
                        let message = format!("Worker loop error: {e}");
                        match e {
                            LoopError::StreamMissing(job_id) => {
                                self.queue.fail_job(job_id, message).await;
                            }
                        }
                        tokio::time::sleep(self.failure_pause).await;
                    }
                }
            }
        }
    }

    /// One admission cycle: claim at most one job and run it to a
    /// terminal condition.
    async fn process_next(&self, cancel: &CancellationToken) -> Result<(), LoopError> {
        let Some(claimed) = self.queue.claim_next().await? else {
            return Ok(());
        };

        let job_id = claimed.id;
        tracing::info!(job_id = %job_id, "Job claimed");
        self.queue.publish(QueueEvent::JobStarted { job_id });

        match self.run_claimed(claimed, cancel).await {
            Some(outcome) => self.queue.finalize_run(job_id, outcome).await,
            // Shutdown raced the run; the engine is going away, so the
            // job is left as-is.
            None => tracing::info!(job_id = %job_id, "Run abandoned by shutdown"),
        }

        Ok(())
    }

    /// Invoke the routine for a claimed job and drain its stream.
    async fn run_claimed(
        &self,
        claimed: ClaimedRun,
        cancel: &CancellationToken,
    ) -> Option<RunOutcome> {
        let ClaimedRun {
            id,
            params,
            stream,
            mut event_rx,
        } = claimed;

        let Some(routine) = self.queue.worker().await else {
            tracing::warn!(job_id = %id, "No worker routine installed");
            return Some(RunOutcome::Failed(ERR_ROUTINE_NOT_CONFIGURED.to_string()));
        };

        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let mut stream = stream;
            let result = routine.run(params, &mut stream).await;
            if let Err(e) = result {
                tracing::warn!(job_id = %id, error = %e, "Worker routine failed");
                // Noted before the stream drops, so the drain sees the
                // closed channel only after the failure is attributable.
                queue.note_routine_failure(id, e.to_string()).await;
            }
        });

        self.drain(id, &mut event_rx, cancel).await
    }

    /// Consume a running job's events until a terminal condition: an
    /// `End` event, a closed stream, an observed cancellation, or queue
    /// shutdown (`None`).
    async fn drain(
        &self,
        id: JobId,
        event_rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        cancel: &CancellationToken,
    ) -> Option<RunOutcome> {
        loop {
            if self.queue.job_status(id).await != Some(JobStatus::Running) {
                // Cancelled out from under the run; stop consuming and
                // leave any late events unread.
                return Some(RunOutcome::Cancelled);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                event = event_rx.recv() => match event {
                    Some(WorkerEvent::Progress(progress)) => {
                        self.queue.update_progress(id, progress).await;
                    }
                    Some(WorkerEvent::Artifact(reference)) => {
                        tracing::debug!(job_id = %id, artifact = %reference, "Artifact reported");
                        self.queue.record_artifact(id, reference).await;
                    }
                    Some(WorkerEvent::End) => return Some(RunOutcome::Completed),
                    None => {
                        let outcome = match self.queue.take_routine_failure(id).await {
                            Some(message) => RunOutcome::Failed(message),
                            None => RunOutcome::Failed(ERR_INTERRUPTED.to_string()),
                        };
                        return Some(outcome);
                    }
                },
                _ = tokio::time::sleep(self.drain_interval) => {}
            }
        }
    }
}
