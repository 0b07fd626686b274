//! Kiln queue engine.
//!
//! Serializes generation work onto a single worker. Submissions enter
//! a FIFO admission queue; a background loop claims and runs at most
//! one routine at a time; every job stays queryable and cancellable by
//! id. The building blocks:
//!
//! - [`JobQueue`] — the engine: submission, queries, cancellation,
//!   snapshot persistence, start/shutdown lifecycle.
//! - [`WorkerRoutine`] — the host-supplied routine contract.
//! - [`JobStream`] — the per-run reporting handle (progress, artifact,
//!   finish; stop polling).
//! - [`QueueEvent`] — broadcast lifecycle feed via [`JobQueue::subscribe`].
//! - [`snapshot`] — the JSON projection written after every submission.

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod queue;
mod runner;
pub mod snapshot;
pub mod stream;
pub mod worker;

pub use config::QueueConfig;
pub use error::LoopError;
pub use events::QueueEvent;
pub use job::{Job, JobProgress, JobStatus};
pub use queue::JobQueue;
pub use runner::{ERR_INTERRUPTED, ERR_ROUTINE_NOT_CONFIGURED};
pub use stream::{ControlSignal, JobStream, WorkerEvent};
pub use worker::WorkerRoutine;
