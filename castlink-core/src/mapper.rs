//! Pointer coordinate mapping for "contain"-scaled display surfaces.
//!
//! The viewer paints the frame into an element that preserves aspect
//! ratio, so the picture may be letterboxed. Mapping a raw pointer
//! position to frame pixels requires finding the content rectangle,
//! rejecting positions in the margins, and scaling the in-content
//! position from displayed size to frame-pixel size. The mapper also
//! computes the frame→host scale factors so the host can recover
//! host-screen pixels without knowing the display geometry.

use crate::frame::ScreenSize;

// ── Types ────────────────────────────────────────────────────────

/// A rectangle in element coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ContentRect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// A successfully mapped pointer position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedPointer {
    /// Position in frame pixels.
    pub x: f64,
    pub y: f64,
    /// `frame_width / host_screen_width`.
    pub scale_x: f64,
    /// `frame_height / host_screen_height`.
    pub scale_y: f64,
}

// ── Mapping ──────────────────────────────────────────────────────

/// The largest rectangle of the frame's aspect ratio that fits the
/// element, centred (the "contain" content box).
pub fn content_rect(
    element_w: f64,
    element_h: f64,
    frame_w: u32,
    frame_h: u32,
) -> Option<ContentRect> {
    if element_w <= 0.0 || element_h <= 0.0 || frame_w == 0 || frame_h == 0 {
        return None;
    }
    let scale = (element_w / frame_w as f64).min(element_h / frame_h as f64);
    let width = frame_w as f64 * scale;
    let height = frame_h as f64 * scale;
    Some(ContentRect {
        x: (element_w - width) / 2.0,
        y: (element_h - height) / 2.0,
        width,
        height,
    })
}

/// Map a raw pointer position (element pixels) to frame pixels.
///
/// Returns `None` when the position falls in a letterbox margin or
/// the geometry is degenerate — the command must be suppressed, not
/// clamped into the content.
pub fn map_pointer(
    pos_x: f64,
    pos_y: f64,
    element_w: f64,
    element_h: f64,
    frame_w: u32,
    frame_h: u32,
    host: ScreenSize,
) -> Option<MappedPointer> {
    if host.width == 0 || host.height == 0 {
        return None;
    }
    let rect = content_rect(element_w, element_h, frame_w, frame_h)?;
    if !rect.contains(pos_x, pos_y) {
        return None;
    }

    let x = (pos_x - rect.x) / rect.width * frame_w as f64;
    let y = (pos_y - rect.y) / rect.height * frame_h as f64;

    Some(MappedPointer {
        x,
        y,
        scale_x: frame_w as f64 / host.width as f64,
        scale_y: frame_h as f64 / host.height as f64,
    })
}

// ── Tests ────────────────────────────────────────────────────────
