//! Scripted generation routine and sample jobs for driving the queue
//! end to end without a real model backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use kiln_core::params::{GenerationParams, ImageData, InputMedia};
use kiln_core::thumbnail;
use kiln_queue::{JobProgress, JobStream, WorkerRoutine};

/// Simulated generation stages and their tick counts.
const STAGES: &[(&str, u32)] = &[
    ("Encoding prompt", 2),
    ("Sampling", 6),
    ("Decoding latents", 2),
];

/// Routine that fakes a staged generation run.
///
/// Emits one progress update per tick, attaches the submission preview
/// from the halfway point on, and reports a final artifact reference.
/// Checks for a stop request between ticks.
pub struct DemoWorker {
    step_delay: Duration,
}

impl DemoWorker {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for DemoWorker {
    fn default() -> Self {
        Self::new(Duration::from_millis(150))
    }
}

#[async_trait]
impl WorkerRoutine for DemoWorker {
    async fn run(&self, params: GenerationParams, stream: &mut JobStream) -> anyhow::Result<()> {
        let total: u32 = STAGES.iter().map(|(_, ticks)| ticks).sum();
        let preview = thumbnail::render_preview(&params);
        let label = params.generation_type();

        let mut done: u32 = 0;
        for (stage, ticks) in STAGES {
            for tick in 1..=*ticks {
                if stream.stop_requested() {
                    tracing::debug!(%stage, "Stop requested, abandoning the run");
                    return Ok(());
                }

                done += 1;
                let mut progress = JobProgress::new(*stage)
                    .with_status_html(format!("{}% ({tick}/{ticks} in stage)", done * 100 / total));
                if done * 2 >= total {
                    if let Some(uri) = &preview {
                        progress = progress.with_preview(uri.clone());
                    }
                }
                stream.emit_progress(progress);

                tokio::time::sleep(self.step_delay).await;
            }
        }

        stream.emit_artifact(format!("out/{}.mp4", slug(&label)));
        stream.finish();
        Ok(())
    }
}

fn slug(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// A small batch exercising every input shape the queue understands.
pub fn sample_jobs() -> Vec<GenerationParams> {
    vec![
        GenerationParams::new()
            .with_model_type("Video F1")
            .with_lora("detail-boost", 0.7)
            .with_extra("prompt", json!("a lighthouse in a storm"))
            .with_extra("steps", json!(30)),
        GenerationParams::new()
            .with_model_type("Image")
            .with_input_media(InputMedia::Image(gradient_image(96, 64)))
            .with_extra("prompt", json!("portrait, soft light")),
        GenerationParams::new()
            .with_latent_type("Green Screen")
            .with_extra("prompt", json!("dancing robot, studio floor")),
        GenerationParams::new()
            .with_model_type("Video Extend")
            .with_input_media(InputMedia::Reference("clips/source.mp4".into()))
            .with_extra("prompt", json!("continue the pan")),
    ]
}

/// Deterministic RGB gradient used as a stand-in source image.
pub fn gradient_image(width: u32, height: u32) -> ImageData {
    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.push((x * 255 / width.max(1)) as u8);
            pixels.push((y * 255 / height.max(1)) as u8);
            pixels.push(128);
        }
    }
    ImageData::new(width, height, pixels).expect("gradient buffer matches its dimensions")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use kiln_core::JobId;
    use kiln_queue::{JobQueue, JobStatus, QueueConfig};

    fn test_config(dir: &tempfile::TempDir) -> QueueConfig {
        QueueConfig {
            poll_interval: Duration::from_millis(10),
            drain_interval: Duration::from_millis(10),
            snapshot_path: dir.path().join("queue.json"),
            ..QueueConfig::default()
        }
    }

    async fn wait_for_terminal(queue: &JobQueue, id: JobId) -> JobStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = queue.job(id).await.expect("job is tracked").status;
            if status.is_terminal() {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job did not settle in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_running(queue: &JobQueue, id: JobId) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if queue.job(id).await.expect("job is tracked").status == JobStatus::Running {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job did not start in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn demo_worker_completes_a_latent_job() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::start(test_config(&dir)).await;
        queue
            .set_worker(Arc::new(DemoWorker::new(Duration::from_millis(1))))
            .await;

        // The latent sample has no model type, so the label is the default.
        let id = queue.submit(sample_jobs().swap_remove(2)).await;
        assert_eq!(wait_for_terminal(&queue, id).await, JobStatus::Completed);

        let job = queue.job(id).await.unwrap();
        assert_eq!(job.result.as_deref(), Some("out/original.mp4"));
        assert!(job.progress.is_some());

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn demo_worker_yields_the_slot_after_a_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::start(test_config(&dir)).await;
        queue
            .set_worker(Arc::new(DemoWorker::new(Duration::from_millis(50))))
            .await;

        let first = queue.submit(GenerationParams::new()).await;
        wait_for_running(&queue, first).await;
        assert!(queue.cancel(first).await);
        assert_eq!(wait_for_terminal(&queue, first).await, JobStatus::Cancelled);

        // The routine notices the stop and the next job gets the slot.
        let second = queue.submit(GenerationParams::new()).await;
        assert_eq!(wait_for_terminal(&queue, second).await, JobStatus::Completed);

        queue.shutdown().await;
    }
}
