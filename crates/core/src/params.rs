//! Generation parameters attached to every job.
//!
//! Hosts describe a generation request with [`GenerationParams`]: the model
//! variant, optional source media, the latent canvas for media-free runs,
//! the LoRA selection, and an open extension bag for host-protocol fields
//! the queue itself never interprets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Generation type label used when no `model_type` is supplied.
pub const DEFAULT_GENERATION_TYPE: &str = "Original";

/// Effective LoRA strength when a selected name has no usable value.
pub const DEFAULT_LORA_WEIGHT: f64 = 1.0;

/// Bytes per pixel in a decoded RGB8 buffer.
const RGB8_BYTES_PER_PIXEL: usize = 3;

// ---------------------------------------------------------------------------
// Input media
// ---------------------------------------------------------------------------

/// Decoded RGB8 image supplied by the host (row-major, 3 bytes per pixel).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageData {
    /// Build a validated image buffer.
    ///
    /// Fails when the buffer length does not match `width * height * 3`
    /// or either dimension is zero.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::Validation(format!(
                "image dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * RGB8_BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(CoreError::Validation(format!(
                "pixel buffer length {} does not match {width}x{height} RGB8 (expected {expected})",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB8 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// Source media for a generation, when the host supplies any.
#[derive(Debug, Clone)]
pub enum InputMedia {
    /// A decoded source image.
    Image(ImageData),
    /// An opaque path or URI the worker resolves itself (e.g. a source
    /// video on disk).
    Reference(String),
}

// ---------------------------------------------------------------------------
// LoRA weights
// ---------------------------------------------------------------------------

/// A LoRA strength as hosts supply it: either a bare number or a list
/// whose first element is the strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoraWeight {
    Value(f64),
    Values(Vec<f64>),
}

impl LoraWeight {
    /// Collapse to a concrete strength. Empty lists fall back to
    /// [`DEFAULT_LORA_WEIGHT`].
    pub fn resolve(&self) -> f64 {
        match self {
            LoraWeight::Value(v) => *v,
            LoraWeight::Values(values) => values.first().copied().unwrap_or(DEFAULT_LORA_WEIGHT),
        }
    }
}

impl From<f64> for LoraWeight {
    fn from(value: f64) -> Self {
        LoraWeight::Value(value)
    }
}

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Parameter bag describing one generation request.
///
/// The three LoRA vectors mirror the host protocol: `selected_loras` is
/// the active selection, while `lora_values` is aligned index-for-index
/// with `lora_loaded_names` (the full set the host has loaded), not with
/// the selection.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    /// Model variant; drives the job's `generation_type` label.
    pub model_type: Option<String>,
    /// Source media, when the generation starts from an image or file.
    pub input_media: Option<InputMedia>,
    /// Named canvas color for media-free generations (e.g. `"Black"`).
    pub latent_type: Option<String>,
    pub selected_loras: Vec<String>,
    pub lora_values: Vec<LoraWeight>,
    pub lora_loaded_names: Vec<String>,
    /// Host-protocol fields carried through to the queue snapshot.
    pub extra: serde_json::Map<String, Value>,
}

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }

    pub fn with_input_media(mut self, media: InputMedia) -> Self {
        self.input_media = Some(media);
        self
    }

    pub fn with_latent_type(mut self, latent_type: impl Into<String>) -> Self {
        self.latent_type = Some(latent_type.into());
        self
    }

    /// Select a LoRA and register it as loaded with the given strength.
    pub fn with_lora(mut self, name: impl Into<String>, weight: impl Into<LoraWeight>) -> Self {
        let name = name.into();
        self.selected_loras.push(name.clone());
        self.lora_loaded_names.push(name);
        self.lora_values.push(weight.into());
        self
    }

    /// Supply the three LoRA vectors exactly as the host protocol carries
    /// them (selection may be a subset of the loaded names).
    pub fn with_lora_selection(
        mut self,
        selected: Vec<String>,
        values: Vec<LoraWeight>,
        loaded: Vec<String>,
    ) -> Self {
        self.selected_loras = selected;
        self.lora_values = values;
        self.lora_loaded_names = loaded;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The job's generation type label: `model_type`, or
    /// [`DEFAULT_GENERATION_TYPE`] when absent.
    pub fn generation_type(&self) -> String {
        self.model_type
            .clone()
            .unwrap_or_else(|| DEFAULT_GENERATION_TYPE.to_string())
    }

    /// Resolve the effective strength for a selected LoRA name.
    ///
    /// Looks the name up in `lora_loaded_names` and reads the value at
    /// the same index; names missing from the loaded list, or indexes
    /// past the end of the value list, resolve to
    /// [`DEFAULT_LORA_WEIGHT`].
    pub fn lora_weight_for(&self, name: &str) -> f64 {
        self.lora_loaded_names
            .iter()
            .position(|loaded| loaded == name)
            .and_then(|idx| self.lora_values.get(idx))
            .map(LoraWeight::resolve)
            .unwrap_or(DEFAULT_LORA_WEIGHT)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
