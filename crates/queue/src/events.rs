//! Lifecycle events broadcast by the queue.
//!
//! Hosts subscribe via [`crate::queue::JobQueue::subscribe`] to follow
//! admissions and terminal transitions without polling the job table.
//! Delivery uses `tokio::sync::broadcast` semantics: no subscribers is
//! fine, slow subscribers observe `Lagged`.

use serde::Serialize;

use kiln_core::types::JobId;

/// A lifecycle transition observed by the queue.
#[derive(Debug, Clone, Serialize)]
pub enum QueueEvent {
    /// A job entered the admission queue.
    JobSubmitted {
        job_id: JobId,
        generation_type: String,
    },

    /// The worker loop claimed a job and invoked the routine.
    JobStarted { job_id: JobId },

    /// A running job reported progress.
    JobProgress { job_id: JobId, description: String },

    /// A job finished successfully.
    JobCompleted {
        job_id: JobId,
        /// Artifact reference, when the routine produced one.
        result: Option<String>,
    },

    /// A job failed (routine error, missing routine, or interruption).
    JobFailed { job_id: JobId, error: String },

    /// A job was cancelled, before or during its run.
    JobCancelled { job_id: JobId },
}
