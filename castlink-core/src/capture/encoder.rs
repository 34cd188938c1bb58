//! Raw image → JPEG frame encoding.
//!
//! Downsamples via nearest-neighbour while converting BGRA to RGB,
//! then JPEG-compresses at the configured quality. Frame dimensions on
//! the wire are the post-downsample dimensions.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};

use crate::capture::grabber::RawImage;
use crate::error::CastError;

/// Encoded JPEG output with its final dimensions.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Stateless frame encoder.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Scaled output dimensions for a source size and downsample
    /// factor: `round(dim × factor)`, at least 1×1.
    pub fn scaled_dimensions(width: u32, height: u32, downsample: f32) -> (u32, u32) {
        let w = ((width as f32 * downsample).round() as u32).max(1);
        let h = ((height as f32 * downsample).round() as u32).max(1);
        (w, h)
    }

    /// Encode a raw BGRA image to JPEG at `quality`, downsampled by
    /// `downsample` (0 < f ≤ 1).
    pub fn encode(
        raw: &RawImage,
        quality: u8,
        downsample: f32,
    ) -> Result<EncodedImage, CastError> {
        if raw.width == 0 || raw.height == 0 {
            return Err(CastError::Capture("empty raw image".into()));
        }
        if raw.data.len() < raw.stride * raw.height as usize {
            return Err(CastError::Capture(format!(
                "raw image truncated: {} bytes for {}x{} stride {}",
                raw.data.len(),
                raw.width,
                raw.height,
                raw.stride
            )));
        }

        let (out_w, out_h) = Self::scaled_dimensions(raw.width, raw.height, downsample);
        let rgb = bgra_to_rgb_scaled(raw, out_w, out_h);

        let mut out = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        let img: RgbImage = ImageBuffer::from_raw(out_w, out_h, rgb)
            .ok_or_else(|| CastError::Encoding("rgb buffer does not match dimensions".into()))?;
        img.write_with_encoder(encoder)
            .map_err(|e| CastError::Encoding(e.to_string()))?;

        Ok(EncodedImage {
            jpeg: out.into_inner(),
            width: out_w,
            height: out_h,
        })
    }
}

/// BGRA → RGB conversion with nearest-neighbour scaling, honouring the
/// source row stride.
fn bgra_to_rgb_scaled(raw: &RawImage, dst_w: u32, dst_h: u32) -> Vec<u8> {
    let src_w = raw.width as usize;
    let src_h = raw.height as usize;
    let mut rgb = Vec::with_capacity(dst_w as usize * dst_h as usize * 3);

    for y in 0..dst_h as usize {
        let src_y = y * src_h / dst_h as usize;
        let row = src_y * raw.stride;
        for x in 0..dst_w as usize {
            let src_x = x * src_w / dst_w as usize;
            let offset = row + src_x * 4;
            rgb.push(raw.data[offset + 2]);
            rgb.push(raw.data[offset + 1]);
            rgb.push(raw.data[offset]);
        }
    }

    rgb
}

// ── Tests ────────────────────────────────────────────────────────
