//! Integration tests for the single-flight guarantee.
//!
//! However many jobs are submitted or cancelled, at most one routine
//! invocation is ever in flight, and claims follow admission order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use kiln_core::params::GenerationParams;
use kiln_queue::{JobQueue, JobStatus, JobStream, QueueEvent, WorkerRoutine};

mod common;
use common::{test_config, wait_for_event, wait_for_status};

// ---------------------------------------------------------------------------
// Scripted routines
// ---------------------------------------------------------------------------

/// Counts in-flight runs and remembers the highest count observed.
#[derive(Default)]
struct TrackingWorker {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl WorkerRoutine for TrackingWorker {
    async fn run(&self, _params: GenerationParams, stream: &mut JobStream) -> anyhow::Result<()> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(25)).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        stream.finish();
        Ok(())
    }
}

/// Finishes immediately.
struct FinishWorker;

#[async_trait]
impl WorkerRoutine for FinishWorker {
    async fn run(&self, _params: GenerationParams, stream: &mut JobStream) -> anyhow::Result<()> {
        stream.finish();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test: one run at a time
// ---------------------------------------------------------------------------

/// Six rapid submissions (two of them cancelled mid-queue) never
/// overlap routine invocations.
#[tokio::test]
async fn at_most_one_routine_runs_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let queue = JobQueue::start(test_config(&dir)).await;

    let worker = Arc::new(TrackingWorker::default());
    queue.set_worker(worker.clone()).await;

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(queue.submit(GenerationParams::new()).await);
    }

    // The tail job is still far from the head; cancel it while queued.
    let cancelled = *ids.last().unwrap();
    assert!(queue.cancel(cancelled).await);

    for id in &ids[..5] {
        wait_for_status(&queue, *id, JobStatus::Completed).await;
    }

    assert_eq!(worker.max_active.load(Ordering::SeqCst), 1);
    let skipped = queue.job(cancelled).await.unwrap();
    assert_eq!(skipped.status, JobStatus::Cancelled);
    assert!(skipped.started_at.is_none());

    queue.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: admission order
// ---------------------------------------------------------------------------

/// Claims happen strictly in submission order.
#[tokio::test]
async fn jobs_start_in_admission_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue = JobQueue::start(test_config(&dir)).await;
    queue.set_worker(Arc::new(FinishWorker)).await;

    let mut events = queue.subscribe();
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(queue.submit(GenerationParams::new()).await);
    }

    let mut started = Vec::new();
    for _ in 0..ids.len() {
        let event = wait_for_event(&mut events, |e| {
            matches!(e, QueueEvent::JobStarted { .. })
        })
        .await;
        if let QueueEvent::JobStarted { job_id } = event {
            started.push(job_id);
        }
    }

    assert_eq!(started, ids);
    queue.shutdown().await;
}
