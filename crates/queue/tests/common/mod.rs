use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use kiln_core::types::JobId;
use kiln_queue::{Job, JobQueue, JobStatus, QueueConfig, QueueEvent};

/// Upper bound for every await-helper; generous so slow CI cannot
/// flake a test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a fast test `QueueConfig` writing its snapshot into `dir`.
///
/// Tight intervals keep the admission loop responsive under test; the
/// snapshot path points into the temp dir so tests never touch the
/// working directory.
pub fn test_config(dir: &tempfile::TempDir) -> QueueConfig {
    QueueConfig {
        poll_interval: Duration::from_millis(10),
        drain_interval: Duration::from_millis(10),
        failure_pause: Duration::from_millis(10),
        snapshot_path: dir.path().join("queue.json"),
        event_capacity: 64,
    }
}

/// Poll a job until it reaches `expected`, panicking if it settles in
/// a different terminal state or the timeout elapses.
pub async fn wait_for_status(queue: &Arc<JobQueue>, id: JobId, expected: JobStatus) -> Job {
    let result = timeout(WAIT_TIMEOUT, async {
        loop {
            if let Some(job) = queue.job(id).await {
                if job.status == expected {
                    return job;
                }
                if job.status.is_terminal() {
                    panic!(
                        "job {id} settled in {:?} while waiting for {expected:?} (error: {:?})",
                        job.status, job.error
                    );
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    result.unwrap_or_else(|_| panic!("job {id} did not reach {expected:?} within {WAIT_TIMEOUT:?}"))
}

/// Receive broadcast events until one matches `pred`, panicking after
/// [`WAIT_TIMEOUT`]. Lagged gaps are tolerated.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<QueueEvent>,
    pred: impl Fn(&QueueEvent) -> bool,
) -> QueueEvent {
    let result = timeout(WAIT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| panic!("expected event did not arrive within {WAIT_TIMEOUT:?}"))
}
