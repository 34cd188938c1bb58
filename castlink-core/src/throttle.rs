//! Viewer-side input throttling and command translation.
//!
//! Pointer moves are rate-limited against a monotonic clock — excess
//! moves inside the window are dropped, never queued. Clicks, button
//! transitions, scrolls and key presses are discrete, low-frequency,
//! semantically important actions and are never throttled.
//!
//! While remote control is active the viewer captures the keyboard,
//! except for a short list of browser-critical shortcuts (refresh,
//! close tab, new tab, new window) which must keep working locally.

use std::time::{Duration, Instant};

use crate::frame::ScreenSize;
use crate::mapper::map_pointer;
use crate::message::{KeyModifier, MouseButton, ViewerMessage};

/// Minimum spacing between forwarded pointer moves (~60 Hz).
pub const MOVE_INTERVAL: Duration = Duration::from_millis(16);

// ── Shortcut pass-through ────────────────────────────────────────

/// Browser-critical shortcuts that pass through unintercepted even
/// while remote control is active.
pub fn is_passthrough_shortcut(key: &str, modifiers: &[KeyModifier]) -> bool {
    let primary = modifiers.contains(&KeyModifier::Control)
        || modifiers.contains(&KeyModifier::Command);

    match key {
        // Refresh.
        "F5" => true,
        "r" | "R" => primary,
        // Close tab / new tab / new window.
        "w" | "W" | "t" | "T" | "n" | "N" => primary,
        _ => false,
    }
}

// ── Display geometry ─────────────────────────────────────────────

/// What the throttler needs to know about the on-screen surface.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceGeometry {
    /// Displayed bounding box of the element, in element pixels.
    pub element_w: f64,
    pub element_h: f64,
    /// Pixel dimensions of the frame currently displayed.
    pub frame_w: u32,
    pub frame_h: u32,
    /// Host screen size, from the last `capture-status`.
    pub host: ScreenSize,
}

// ── InputThrottler ───────────────────────────────────────────────

/// Translates raw UI events into coordinate-mapped commands.
pub struct InputThrottler {
    last_move: Option<Instant>,
    min_interval: Duration,
}

impl InputThrottler {
    pub fn new() -> Self {
        Self::with_interval(MOVE_INTERVAL)
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            last_move: None,
            min_interval,
        }
    }

    /// Translate a pointer move.
    ///
    /// Returns `None` when the move falls inside the throttle window
    /// or outside the content rectangle; only a forwarded move
    /// consumes the throttle slot.
    pub fn pointer_move(
        &mut self,
        now: Instant,
        pos_x: f64,
        pos_y: f64,
        geometry: &SurfaceGeometry,
    ) -> Option<ViewerMessage> {
        if let Some(last) = self.last_move {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }
        let mapped = map_pointer(
            pos_x,
            pos_y,
            geometry.element_w,
            geometry.element_h,
            geometry.frame_w,
            geometry.frame_h,
            geometry.host,
        )?;
        self.last_move = Some(now);
        Some(ViewerMessage::MouseMove {
            x: mapped.x,
            y: mapped.y,
            scale_x: mapped.scale_x,
            scale_y: mapped.scale_y,
        })
    }

    /// Clicks are never throttled.
    pub fn click(&self, button: MouseButton, double: bool) -> ViewerMessage {
        ViewerMessage::MouseClick { button, double }
    }

    pub fn button_down(&self, button: MouseButton) -> ViewerMessage {
        ViewerMessage::MouseDown { button }
    }

    pub fn button_up(&self, button: MouseButton) -> ViewerMessage {
        ViewerMessage::MouseUp { button }
    }

    /// Scrolls are never throttled.
    pub fn scroll(&self, delta_y: f64) -> ViewerMessage {
        ViewerMessage::MouseScroll { delta_y }
    }

    /// Translate a key press. Returns `None` for pass-through
    /// shortcuts, which must reach the local browser instead.
    pub fn key_press(&self, key: &str, modifiers: &[KeyModifier]) -> Option<ViewerMessage> {
        if is_passthrough_shortcut(key, modifiers) {
            return None;
        }
        Some(ViewerMessage::KeyPress {
            key: key.to_string(),
            modifiers: modifiers.to_vec(),
        })
    }
}

impl Default for InputThrottler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
