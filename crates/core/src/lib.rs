//! Kiln domain primitives.
//!
//! Pure types and functions shared by the queue engine and its hosts:
//!
//! - [`params`] — generation parameters attached to every job, including
//!   LoRA weight resolution and input-media descriptors.
//! - [`thumbnail`] — submission-time preview rendering (PNG data URIs).
//! - [`types`] — identifier and timestamp aliases.
//! - [`error`] — the domain error type.
//!
//! Nothing here is async and nothing touches the filesystem; image
//! encoding happens in memory.

pub mod error;
pub mod params;
pub mod thumbnail;
pub mod types;

pub use error::CoreError;
pub use params::{GenerationParams, ImageData, InputMedia, LoraWeight};
pub use types::{JobId, Timestamp};
