//! Worker routine contract.

use async_trait::async_trait;

use kiln_core::params::GenerationParams;

use crate::stream::JobStream;

/// A host-supplied generation routine.
///
/// The queue runs at most one routine invocation at a time. A run
/// reports through its [`JobStream`]: progress and artifact references
/// as it goes, then [`JobStream::finish`] when the work is done.
///
/// Outcome mapping:
/// - `finish()` observed -> the job completes.
/// - `Err` returned without `finish()` -> the job fails with the
///   error's message.
/// - return without `finish()` -> the job fails as interrupted.
///
/// Routines should poll [`JobStream::stop_requested`] at natural
/// checkpoints and return early when asked; cancellation is
/// best-effort and the queue never waits for an acknowledgement.
#[async_trait]
pub trait WorkerRoutine: Send + Sync {
    async fn run(&self, params: GenerationParams, stream: &mut JobStream) -> anyhow::Result<()>;
}
