//! Per-job bidirectional stream.
//!
//! Each job gets a dedicated attachment made of two unbounded channels:
//! control signals flow queue -> worker, events flow worker -> queue.
//! The worker-side handle ([`JobStream`]) is handed to the routine; the
//! queue keeps the opposite halves in its job table.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::job::JobProgress;

/// Signal sent by the queue to a running routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Stop producing and return as soon as practical.
    Stop,
}

/// Event reported by a routine to the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Progress update; replaces the job's previous progress snapshot.
    Progress(JobProgress),
    /// Artifact reference produced (or updated) by the routine.
    Artifact(String),
    /// Terminal marker. Only the first `End` counts.
    End,
}

/// Worker-side handle: receives control signals, emits events.
///
/// All emits are best-effort. A queue that has stopped listening (for
/// example after cancellation) must never break a routine, so send
/// results are deliberately ignored.
#[derive(Debug)]
pub struct JobStream {
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl JobStream {
    pub fn emit_progress(&self, progress: JobProgress) {
        let _ = self.event_tx.send(WorkerEvent::Progress(progress));
    }

    pub fn emit_artifact(&self, reference: impl Into<String>) {
        let _ = self.event_tx.send(WorkerEvent::Artifact(reference.into()));
    }

    /// Mark the run complete.
    pub fn finish(&self) {
        let _ = self.event_tx.send(WorkerEvent::End);
    }

    /// True once the queue has asked this run to stop.
    ///
    /// Non-blocking; routines poll this at natural checkpoints. A
    /// disconnected control side also reads as a stop request.
    pub fn stop_requested(&mut self) -> bool {
        match self.control_rx.try_recv() {
            Ok(ControlSignal::Stop) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }
}

/// Queue-side halves of a job's stream.
#[derive(Debug)]
pub(crate) struct StreamEnds {
    pub(crate) control_tx: mpsc::UnboundedSender<ControlSignal>,
    pub(crate) event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
}

/// Create the connected stream pair for one job.
pub(crate) fn job_stream() -> (JobStream, StreamEnds) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    (
        JobStream {
            control_rx,
            event_tx,
        },
        StreamEnds {
            control_tx,
            event_rx,
        },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
