/// Domain-level error type shared across the workspace.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input data failed validation, with a human-readable message.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// PNG encoding of a preview thumbnail failed.
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}
