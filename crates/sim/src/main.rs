use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiln_core::params::GenerationParams;
use kiln_queue::{JobQueue, QueueConfig, QueueEvent};
use kiln_sim::{sample_jobs, DemoWorker};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_sim=debug,kiln_queue=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = QueueConfig::from_env();
    tracing::info!(
        snapshot_path = %config.snapshot_path.display(),
        "Loaded queue configuration"
    );

    // --- Queue engine ---
    let queue = JobQueue::start(config).await;
    queue.set_worker(Arc::new(DemoWorker::default())).await;

    // --- Event follower ---
    let mut events = queue.subscribe();
    let follower = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event follower lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // --- Demo submissions ---
    let mut ids = Vec::new();
    for params in sample_jobs() {
        ids.push(queue.submit(params).await);
    }

    // One extra submission that never runs: cancel it while queued.
    let doomed = queue
        .submit(GenerationParams::new().with_model_type("Video F1"))
        .await;
    if queue.cancel(doomed).await {
        tracing::info!(job_id = %doomed, "Cancelled the tail submission while queued");
    }

    for id in &ids {
        if let Some(position) = queue.position(*id).await {
            tracing::info!(job_id = %id, position, "Queued");
        }
    }

    // --- Wait for the batch (or a termination signal) ---
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("Interrupted before the batch finished");
                break;
            }
            () = tokio::time::sleep(Duration::from_millis(500)) => {
                let jobs = queue.jobs().await;
                if jobs.iter().all(|job| job.status.is_terminal()) {
                    tracing::info!(jobs = jobs.len(), "Demo batch finished");
                    break;
                }
            }
        }
    }

    // --- Post-run cleanup ---
    queue.save_snapshot().await;
    queue.shutdown().await;

    // The bus sender lives inside the queue, so the follower never sees
    // a closed channel; stop it explicitly.
    follower.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Log one lifecycle event from the queue's broadcast bus.
fn log_event(event: &QueueEvent) {
    match event {
        QueueEvent::JobSubmitted {
            job_id,
            generation_type,
        } => {
            tracing::debug!(job_id = %job_id, generation_type = %generation_type, "Bus: submitted");
        }
        QueueEvent::JobStarted { job_id } => {
            tracing::info!(job_id = %job_id, "Bus: started");
        }
        QueueEvent::JobProgress {
            job_id,
            description,
        } => {
            tracing::info!(job_id = %job_id, description = %description, "Bus: progress");
        }
        QueueEvent::JobCompleted { job_id, result } => {
            tracing::info!(job_id = %job_id, result = ?result, "Bus: completed");
        }
        QueueEvent::JobFailed { job_id, error } => {
            tracing::warn!(job_id = %job_id, error = %error, "Bus: failed");
        }
        QueueEvent::JobCancelled { job_id } => {
            tracing::info!(job_id = %job_id, "Bus: cancelled");
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the demo
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
