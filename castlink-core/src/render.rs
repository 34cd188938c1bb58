//! Viewer-side frame rendering with staleness suppression.
//!
//! Frames may arrive out of order or duplicated; the renderer's
//! strictly-increasing-sequence check is the only ordering guarantee
//! in the system. Decoding reuses one buffer across frames instead of
//! allocating per frame; the paint surface is resized only when the
//! frame dimensions actually change.

use std::io::Cursor;

use image::ImageDecoder;
use image::codecs::jpeg::JpegDecoder;
use tracing::trace;

use crate::error::CastError;
use crate::frame::Frame;

// ── PaintSurface ─────────────────────────────────────────────────

/// Contract the renderer needs from a drawing surface.
pub trait PaintSurface {
    /// Reallocate for new frame dimensions.
    fn resize(&mut self, width: u32, height: u32);

    /// Paint one decoded frame of tightly packed RGB8 rows.
    fn paint(&mut self, rgb: &[u8], width: u32, height: u32);
}

// ── FrameRenderer ────────────────────────────────────────────────

/// Decodes accepted frames into a reused buffer and paints them.
pub struct FrameRenderer<S: PaintSurface> {
    surface: S,
    last_sequence: u64,
    /// Reused decode target; allocated on first frame, grown only on
    /// dimension change, released on teardown.
    decode_buf: Vec<u8>,
    dimensions: Option<(u32, u32)>,
}

impl<S: PaintSurface> FrameRenderer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            last_sequence: 0,
            decode_buf: Vec::new(),
            dimensions: None,
        }
    }

    /// Reset the sequence filter. Call when capture restarts
    /// (signalled by a `capture-started` message): the new run may
    /// begin from a fresh sequence origin.
    pub fn reset(&mut self) {
        self.last_sequence = 0;
    }

    /// Accept or drop one frame.
    ///
    /// Returns `Ok(false)` when the frame was dropped as stale
    /// (sequence not strictly greater than the last rendered one).
    pub fn on_frame(&mut self, frame: &Frame) -> Result<bool, CastError> {
        if frame.sequence <= self.last_sequence {
            trace!(
                sequence = frame.sequence,
                last = self.last_sequence,
                "dropping stale or duplicate frame"
            );
            return Ok(false);
        }
        self.last_sequence = frame.sequence;

        let decoder = JpegDecoder::new(Cursor::new(&frame.payload))
            .map_err(|e| CastError::Encoding(e.to_string()))?;
        let (width, height) = decoder.dimensions();
        let total = decoder.total_bytes() as usize;
        if self.decode_buf.len() != total {
            self.decode_buf.resize(total, 0);
        }
        decoder
            .read_image(&mut self.decode_buf)
            .map_err(|e| CastError::Encoding(e.to_string()))?;

        if self.dimensions != Some((width, height)) {
            self.surface.resize(width, height);
            self.dimensions = Some((width, height));
        }
        self.surface.paint(&self.decode_buf, width, height);
        Ok(true)
    }

    /// Sequence of the last rendered frame (0 = none yet).
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Tear down, releasing the decode buffer and returning the
    /// surface to the caller.
    pub fn into_surface(self) -> S {
        self.surface
    }
}

// ── Tests ────────────────────────────────────────────────────────
