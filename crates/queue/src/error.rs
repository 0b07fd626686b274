//! Queue-internal error types.

use kiln_core::types::JobId;

/// Failures contained by the worker loop's tick boundary.
///
/// Nothing here escapes the loop task: a tick that returns one of these
/// is logged at error level, the current job (if any) is force-failed,
/// and the loop pauses briefly before the next tick.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The claimed job's event receiver was already taken, so this run
    /// could never observe the routine. Indicates job-table corruption.
    #[error("Job {0} has no attached event stream")]
    StreamMissing(JobId),
}
