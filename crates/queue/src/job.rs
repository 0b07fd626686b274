//! Job entity and lifecycle states.

use serde::{Deserialize, Serialize};

use kiln_core::params::GenerationParams;
use kiln_core::thumbnail;
use kiln_core::types::{JobId, Timestamp};

/// Lifecycle state of a job.
///
/// Legal transitions: `Pending -> Running`, `Pending -> Cancelled`,
/// `Running -> Completed | Failed | Cancelled`. Terminal states never
/// change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// Latest-wins progress snapshot pushed by the worker routine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Visual preview handle (data URI or path), when the routine has one.
    pub preview: Option<String>,
    /// Short step description (e.g. `"Sampling"`).
    pub description: String,
    /// Formatted status line; host UIs may render markup.
    pub status_html: String,
}

impl JobProgress {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            preview: None,
            description: description.into(),
            status_html: String::new(),
        }
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn with_status_html(mut self, status_html: impl Into<String>) -> Self {
        self.status_html = status_html.into();
        self
    }
}

/// One queued generation.
///
/// Jobs are value snapshots from the host's point of view: every query
/// returns a clone of the tracked entity at that instant.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub params: GenerationParams,
    pub status: JobStatus,
    pub created_at: Timestamp,
    /// Admission counter, breaks position ties between jobs created in
    /// the same instant.
    pub seq: u64,
    pub started_at: Option<Timestamp>,
    /// Set on every terminal transition, including cancellation.
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    /// Opaque reference to the produced artifact (e.g. an output path).
    pub result: Option<String>,
    pub progress: Option<JobProgress>,
    /// Display label derived from `params.model_type` at submission.
    pub generation_type: String,
    /// PNG data URI rendered once at submission, never re-derived.
    pub preview_thumbnail: Option<String>,
}

impl Job {
    /// Build a pending job, deriving the display label and preview
    /// thumbnail from the parameters.
    pub fn new(params: GenerationParams, seq: u64) -> Self {
        let generation_type = params.generation_type();
        let preview_thumbnail = thumbnail::render_preview(&params);

        Self {
            id: uuid::Uuid::new_v4(),
            params,
            status: JobStatus::Pending,
            created_at: chrono::Utc::now(),
            seq,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            progress: None,
            generation_type,
            preview_thumbnail,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_jobs_start_pending_with_no_stamps() {
        let job = Job::new(GenerationParams::new(), 0);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.error.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn generation_type_is_derived_at_construction() {
        let original = Job::new(GenerationParams::new(), 0);
        assert_eq!(original.generation_type, "Original");

        let labelled = Job::new(GenerationParams::new().with_model_type("Video F1"), 1);
        assert_eq!(labelled.generation_type, "Video F1");
    }

    #[test]
    fn latent_params_get_a_preview_thumbnail() {
        let job = Job::new(GenerationParams::new().with_latent_type("Black"), 0);
        let uri = job.preview_thumbnail.expect("latent preview");
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn bare_params_get_no_preview_thumbnail() {
        let job = Job::new(GenerationParams::new(), 0);
        assert!(job.preview_thumbnail.is_none());
    }

    #[test]
    fn terminal_and_active_states_partition_the_lifecycle() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
