use std::fs;
use std::path::PathBuf;

use archflow_contracts::media::{AspectRatio, ResolutionTier};
use archflow_contracts::JobError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

const JPEG_QUALITY: u8 = 90;

/// Reference image as the caller has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputImage {
    Path(PathBuf),
    Bytes(Vec<u8>),
    DataUri(String),
}

/// Target pixel box for an upload. The long edge grows with the requested
/// tier; upscaling to 2K/4K happens remotely on top of this.
pub fn canonical_box(ratio: AspectRatio, tier: ResolutionTier) -> (u32, u32) {
    let edge: u32 = match tier {
        ResolutionTier::Standard | ResolutionTier::OneK => 1024,
        ResolutionTier::TwoK => 1536,
        ResolutionTier::FourK => 2048,
    };
    let short = ((f64::from(edge) * 9.0) / 16.0).round() as u32;
    match ratio {
        AspectRatio::Square => (edge, edge),
        AspectRatio::Landscape => (edge, short),
        AspectRatio::Portrait => (short, edge),
    }
}

/// Splits `data:<mime>;base64,<payload>` into mime and decoded bytes.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let (meta, payload) = uri.trim().split_once(',')?;
    let meta = meta.trim().strip_prefix("data:")?;
    if !meta.contains(";base64") {
        return None;
    }
    let mime = meta
        .split(';')
        .next()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = BASE64.decode(payload.trim().as_bytes()).ok()?;
    Some((mime, bytes))
}

/// Decodes any supported input, cover-crops it to the canonical box, drops
/// alpha onto white and re-encodes as a JPEG data URI.
pub fn normalize_to_data_uri(
    input: &InputImage,
    ratio: AspectRatio,
    tier: ResolutionTier,
) -> Result<String, JobError> {
    let bytes = match input {
        InputImage::Path(path) => fs::read(path).map_err(|err| JobError::InvalidInput {
            message: format!("failed reading {}: {err}", path.display()),
        })?,
        InputImage::Bytes(bytes) => bytes.clone(),
        InputImage::DataUri(uri) => {
            decode_data_uri(uri)
                .map(|(_, bytes)| bytes)
                .ok_or_else(|| JobError::InvalidInput {
                    message: "malformed data URI".to_string(),
                })?
        }
    };
    let decoded = image::load_from_memory(&bytes).map_err(|err| JobError::InvalidInput {
        message: format!("unsupported image: {err}"),
    })?;

    let (width, height) = canonical_box(ratio, tier);
    let fitted = decoded.resize_to_fill(width, height, FilterType::Lanczos3);
    let flattened = flatten_onto_white(&fitted);

    let mut encoded: Vec<u8> = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
        .encode_image(&flattened)
        .map_err(|err| JobError::InvalidInput {
            message: format!("jpeg encode failed: {err}"),
        })?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(encoded)))
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u16::from(a);
        let blend = |channel: u8| -> u8 {
            ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
