//! In-memory paint surface.
//!
//! Stands in for a real drawing surface: keeps the latest decoded RGB
//! frame and render statistics for whatever UI sits on top.

use castlink_core::PaintSurface;

/// Latest-frame surface with render counters.
#[derive(Default)]
pub struct MemorySurface {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    frames_painted: u64,
    resizes: u64,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest painted frame as (rgb, width, height), if any.
    pub fn latest(&self) -> Option<(&[u8], u32, u32)> {
        if self.pixels.is_empty() {
            return None;
        }
        Some((&self.pixels, self.width, self.height))
    }

    pub fn frames_painted(&self) -> u64 {
        self.frames_painted
    }

    pub fn resizes(&self) -> u64 {
        self.resizes
    }
}

impl PaintSurface for MemorySurface {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0; (width * height * 3) as usize];
        self.resizes += 1;
    }

    fn paint(&mut self, rgb: &[u8], width: u32, height: u32) {
        debug_assert_eq!((width, height), (self.width, self.height));
        self.pixels.copy_from_slice(rgb);
        self.frames_painted += 1;
    }
}

// ── Tests ────────────────────────────────────────────────────────
