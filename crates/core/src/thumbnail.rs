//! Submission-time preview thumbnails.
//!
//! Every job gets at most one preview, derived once from its parameters
//! and stored as a `data:image/png;base64,…` URI. Real source images are
//! downscaled; reference media and latent canvases render as solid
//! fills. Rendering failures degrade to no preview, never to an error.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::error::CoreError;
use crate::params::{GenerationParams, ImageData, InputMedia};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Longest edge of a rendered preview, in pixels. Source images larger
/// than this are scaled down (aspect preserved); smaller ones are kept
/// as-is, never upscaled.
pub const PREVIEW_MAX_EDGE: u32 = 100;

/// Fill color for reference-media placeholders (navy).
pub const REFERENCE_FILL: [u8; 3] = [0, 0, 128];

/// Named latent canvas colors. Unrecognized names fall back to black.
const LATENT_COLORS: [(&str, [u8; 3]); 4] = [
    ("Black", [0, 0, 0]),
    ("White", [255, 255, 255]),
    ("Noise", [128, 128, 128]),
    ("Green Screen", [0, 177, 64]),
];

const DATA_URI_PREFIX: &str = "data:image/png;base64,";

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Derive the preview for a job's parameters.
///
/// Precedence: source image, then reference placeholder, then latent
/// fill. Parameters with neither media nor a latent type have no
/// preview. Encoding failures are logged and yield `None`.
pub fn render_preview(params: &GenerationParams) -> Option<String> {
    let rendered = match (&params.input_media, params.latent_type.as_deref()) {
        (Some(InputMedia::Image(image)), _) => image_preview(image),
        (Some(InputMedia::Reference(_)), _) => solid_preview(REFERENCE_FILL),
        (None, Some(latent_type)) => solid_preview(latent_fill_color(latent_type)),
        (None, None) => return None,
    };

    match rendered {
        Ok(uri) => Some(uri),
        Err(e) => {
            tracing::warn!(error = %e, "Preview thumbnail rendering failed");
            None
        }
    }
}

/// Downscale a source image to fit [`PREVIEW_MAX_EDGE`] and encode it.
pub fn image_preview(image: &ImageData) -> Result<String, CoreError> {
    let buffer = RgbImage::from_raw(image.width(), image.height(), image.pixels().to_vec())
        .ok_or_else(|| {
            CoreError::Validation("pixel buffer does not match image dimensions".into())
        })?;

    if image.width() <= PREVIEW_MAX_EDGE && image.height() <= PREVIEW_MAX_EDGE {
        return encode_data_uri(&buffer);
    }

    let scaled = DynamicImage::ImageRgb8(buffer)
        .thumbnail(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE)
        .to_rgb8();
    encode_data_uri(&scaled)
}

/// Encode a [`PREVIEW_MAX_EDGE`]-square solid fill.
pub fn solid_preview(rgb: [u8; 3]) -> Result<String, CoreError> {
    let buffer = RgbImage::from_pixel(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE, Rgb(rgb));
    encode_data_uri(&buffer)
}

/// Canvas color for a named latent type.
pub fn latent_fill_color(latent_type: &str) -> [u8; 3] {
    LATENT_COLORS
        .iter()
        .find(|(name, _)| *name == latent_type)
        .map(|(_, rgb)| *rgb)
        .unwrap_or([0, 0, 0])
}

fn encode_data_uri(buffer: &RgbImage) -> Result<String, CoreError> {
    let mut png_bytes = Vec::new();
    buffer.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;
    Ok(format!("{DATA_URI_PREFIX}{}", STANDARD.encode(&png_bytes)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(uri: &str) -> image::DynamicImage {
        let payload = uri.strip_prefix(DATA_URI_PREFIX).expect("data URI prefix");
        let bytes = STANDARD.decode(payload).expect("valid base64");
        image::load_from_memory(&bytes).expect("valid PNG")
    }

    // -- latent_fill_color ----------------------------------------------------

    #[test]
    fn latent_colors_match_the_table() {
        assert_eq!(latent_fill_color("Black"), [0, 0, 0]);
        assert_eq!(latent_fill_color("White"), [255, 255, 255]);
        assert_eq!(latent_fill_color("Noise"), [128, 128, 128]);
        assert_eq!(latent_fill_color("Green Screen"), [0, 177, 64]);
    }

    #[test]
    fn unknown_latent_type_falls_back_to_black() {
        assert_eq!(latent_fill_color("Plaid"), [0, 0, 0]);
    }

    // -- solid fills ----------------------------------------------------------

    #[test]
    fn solid_preview_is_a_square_png_of_the_fill_color() {
        let uri = solid_preview(REFERENCE_FILL).unwrap();
        let decoded = decode(&uri).to_rgb8();
        assert_eq!(decoded.dimensions(), (PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE));
        assert_eq!(decoded.get_pixel(0, 0).0, REFERENCE_FILL);
        assert_eq!(decoded.get_pixel(99, 99).0, REFERENCE_FILL);
    }

    // -- image previews -------------------------------------------------------

    #[test]
    fn large_image_is_downscaled_preserving_aspect() {
        let image = ImageData::new(200, 100, vec![200; 200 * 100 * 3]).unwrap();
        let uri = image_preview(&image).unwrap();
        let decoded = decode(&uri);
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let image = ImageData::new(40, 30, vec![10; 40 * 30 * 3]).unwrap();
        let uri = image_preview(&image).unwrap();
        let decoded = decode(&uri);
        assert_eq!(decoded.width(), 40);
        assert_eq!(decoded.height(), 30);
    }

    // -- render_preview -------------------------------------------------------

    #[test]
    fn reference_media_renders_the_navy_placeholder() {
        let params = GenerationParams::new()
            .with_input_media(InputMedia::Reference("clips/source.mp4".into()));
        let uri = render_preview(&params).expect("placeholder preview");
        let decoded = decode(&uri).to_rgb8();
        assert_eq!(decoded.get_pixel(50, 50).0, REFERENCE_FILL);
    }

    #[test]
    fn latent_only_params_render_the_named_fill() {
        let params = GenerationParams::new().with_latent_type("Green Screen");
        let uri = render_preview(&params).expect("latent preview");
        let decoded = decode(&uri).to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 177, 64]);
    }

    #[test]
    fn no_media_and_no_latent_type_means_no_preview() {
        assert_eq!(render_preview(&GenerationParams::new()), None);
    }

    #[test]
    fn image_media_takes_precedence_over_latent_type() {
        let image = ImageData::new(10, 10, vec![255; 300]).unwrap();
        let params = GenerationParams::new()
            .with_input_media(InputMedia::Image(image))
            .with_latent_type("Black");
        let uri = render_preview(&params).expect("image preview");
        let decoded = decode(&uri).to_rgb8();
        assert_eq!(decoded.get_pixel(5, 5).0, [255, 255, 255]);
    }
}
