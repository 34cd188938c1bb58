//! Screen grabber contract.
//!
//! The capture loop is independent of any native screenshot API; it
//! only requires an implementation of [`ScreenGrabber`]. The host
//! binary supplies a real one; tests supply scripted ones.

use async_trait::async_trait;

use crate::error::CastError;
use crate::frame::ScreenSize;

// ── RawImage ─────────────────────────────────────────────────────

/// One uncompressed screen image as delivered by the OS.
///
/// Pixels are BGRA rows; `stride` is the byte length of one row and
/// may exceed `width * 4` (driver padding).
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: Vec<u8>,
}

impl RawImage {
    /// Build a tightly packed image (stride = width × 4).
    pub fn packed(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width as usize * 4,
            data,
        }
    }
}

// ── ScreenGrabber ────────────────────────────────────────────────

/// Contract the capture loop needs from "a screen grabber".
///
/// Implementations must report OS capture-permission denials as
/// [`CastError::PermissionDenied`] so the loop can distinguish a fatal
/// start failure from a transient per-tick one.
#[async_trait]
pub trait ScreenGrabber: Send + Sync + 'static {
    /// Grab one raw image of the given screen.
    async fn grab(&self, screen_index: usize) -> Result<RawImage, CastError>;

    /// Native dimensions of the given screen.
    async fn screen_size(&self, screen_index: usize) -> Result<ScreenSize, CastError>;
}

/// Native screen geometry reported when capture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    /// Native size of the captured screen.
    pub screen: ScreenSize,
}
