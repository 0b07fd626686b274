//! Queue snapshot persistence.
//!
//! After every submission the queue mirrors its job table to a JSON
//! document: a map of job id -> record, pretty-printed, full overwrite.
//! The file is write-only telemetry for host tooling and is never read
//! back at startup. Failures are contained at every level: a job whose
//! record cannot be built degrades to a minimal stub, and a failed
//! write is logged without disturbing queue operation.

use std::path::Path;

use serde_json::{json, Map, Value};

use kiln_core::params::{GenerationParams, InputMedia};

use crate::job::Job;

/// Extension-bag keys never copied into a snapshot record. These carry
/// bulky or transient host-protocol payloads (decoded frames, stream
/// handles).
pub const RESERVED_PARAM_KEYS: [&str; 3] = ["input_image", "end_frame_image", "stream"];

// ---------------------------------------------------------------------------
// Record building
// ---------------------------------------------------------------------------

/// Build the snapshot record for one job.
///
/// Never fails: a job whose full record cannot be serialized degrades
/// to `{id, status, error}` so one bad job cannot lose the document.
pub fn job_record(job: &Job, position: Option<usize>) -> Value {
    match full_record(job, position) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(
                job_id = %job.id,
                error = %e,
                "Falling back to minimal snapshot record",
            );
            json!({
                "id": job.id,
                "status": job.status,
                "error": format!("Serialization failed: {e}"),
            })
        }
    }
}

fn full_record(job: &Job, position: Option<usize>) -> Result<Value, serde_json::Error> {
    let mut record = Map::new();
    record.insert("id".into(), serde_json::to_value(job.id)?);
    record.insert("status".into(), serde_json::to_value(job.status)?);
    record.insert("created_at".into(), serde_json::to_value(job.created_at)?);
    record.insert("started_at".into(), serde_json::to_value(job.started_at)?);
    record.insert(
        "completed_at".into(),
        serde_json::to_value(job.completed_at)?,
    );
    record.insert("error".into(), serde_json::to_value(&job.error)?);
    record.insert("result".into(), serde_json::to_value(&job.result)?);
    record.insert("queue_position".into(), serde_json::to_value(position)?);
    record.insert(
        "generation_type".into(),
        Value::String(job.generation_type.clone()),
    );
    record.insert("params".into(), Value::Object(project_params(&job.params)));
    Ok(Value::Object(record))
}

/// Project parameters for the snapshot: typed fields under their
/// snake_case names, extension-bag entries minus [`RESERVED_PARAM_KEYS`],
/// input media summarized rather than embedded, and the three LoRA
/// vectors folded into one `loras` map of name -> effective weight.
pub fn project_params(params: &GenerationParams) -> Map<String, Value> {
    let mut out = Map::new();

    if let Some(model_type) = &params.model_type {
        out.insert("model_type".into(), Value::String(model_type.clone()));
    }
    if let Some(latent_type) = &params.latent_type {
        out.insert("latent_type".into(), Value::String(latent_type.clone()));
    }

    match &params.input_media {
        Some(InputMedia::Image(image)) => {
            out.insert(
                "input_image_size".into(),
                json!({ "width": image.width(), "height": image.height() }),
            );
        }
        Some(InputMedia::Reference(reference)) => {
            out.insert("input_reference".into(), Value::String(reference.clone()));
        }
        None => {}
    }

    for (key, value) in &params.extra {
        if RESERVED_PARAM_KEYS.contains(&key.as_str()) {
            continue;
        }
        out.insert(key.clone(), value.clone());
    }

    if !params.selected_loras.is_empty() {
        let mut loras = Map::new();
        for name in &params.selected_loras {
            loras.insert(name.clone(), json!(params.lora_weight_for(name)));
        }
        out.insert("loras".into(), Value::Object(loras));
    }

    out
}

/// Build the full snapshot document from `(job, position)` pairs.
pub fn snapshot_document(entries: &[(Job, Option<usize>)]) -> Value {
    let mut document = Map::new();
    for (job, position) in entries {
        document.insert(job.id.to_string(), job_record(job, *position));
    }
    Value::Object(document)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write a snapshot document, pretty-printed, replacing any previous
/// file. Failures are logged and swallowed.
pub async fn write_snapshot(path: &Path, document: &Value) {
    let payload = match serde_json::to_string_pretty(document) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "Queue snapshot serialization failed");
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(
                    path = %parent.display(),
                    error = %e,
                    "Could not create snapshot directory",
                );
            }
        }
    }

    match tokio::fs::write(path, payload).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Queue snapshot written"),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Queue snapshot write failed")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
