//! Local input capture → remote command translation.
//!
//! The seam a UI shell plugs into: raw pointer/keyboard events from
//! whatever window system displays the picture go in, coordinate-mapped
//! and throttled [`ViewerMessage`] commands come out. Nothing is
//! produced while the host reports remote control disabled, and pointer
//! positions over the letterbox margins map to nothing.

use std::time::Instant;

use castlink_core::{
    InputThrottler, KeyModifier, MouseButton, ScreenSize, SurfaceGeometry, ViewerMessage,
};

/// Raw UI events as a shell delivers them, positions in element pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    PointerMove { x: f64, y: f64 },
    Click { button: MouseButton, double: bool },
    ButtonDown { button: MouseButton },
    ButtonUp { button: MouseButton },
    Scroll { delta_y: f64 },
    Key { key: String, modifiers: Vec<KeyModifier> },
    Text { text: String },
}

/// Stateful event translator.
///
/// Tracks the pieces of display geometry as the session learns them
/// (frame dimensions from each frame, host screen size from
/// `capture-status`, the view box from the shell); pointer events only
/// translate once all three are known.
pub struct InputTranslator {
    throttler: InputThrottler,
    view_box: Option<(f64, f64)>,
    frame: Option<(u32, u32)>,
    host: Option<ScreenSize>,
    active: bool,
}

impl InputTranslator {
    pub fn new() -> Self {
        Self {
            throttler: InputThrottler::new(),
            view_box: None,
            frame: None,
            host: None,
            active: false,
        }
    }

    /// Follow the host's `remote-control-status`.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Displayed bounding box of the picture element.
    pub fn set_view_box(&mut self, width: f64, height: f64) {
        self.view_box = Some((width, height));
    }

    /// Dimensions of the frame currently displayed.
    pub fn set_frame(&mut self, width: u32, height: u32) {
        self.frame = Some((width, height));
    }

    /// Host screen size, from the last `capture-status`.
    pub fn set_host_screen(&mut self, host: ScreenSize) {
        self.host = Some(host);
    }

    fn geometry(&self) -> Option<SurfaceGeometry> {
        let (element_w, element_h) = self.view_box?;
        let (frame_w, frame_h) = self.frame?;
        let host = self.host?;
        Some(SurfaceGeometry {
            element_w,
            element_h,
            frame_w,
            frame_h,
            host,
        })
    }

    /// Translate one raw event into a command to send, if any.
    pub fn translate(&mut self, event: RawEvent, now: Instant) -> Option<ViewerMessage> {
        if !self.active {
            return None;
        }
        match event {
            RawEvent::PointerMove { x, y } => {
                let geometry = self.geometry()?;
                self.throttler.pointer_move(now, x, y, &geometry)
            }
            RawEvent::Click { button, double } => Some(self.throttler.click(button, double)),
            RawEvent::ButtonDown { button } => Some(self.throttler.button_down(button)),
            RawEvent::ButtonUp { button } => Some(self.throttler.button_up(button)),
            RawEvent::Scroll { delta_y } => Some(self.throttler.scroll(delta_y)),
            RawEvent::Key { key, modifiers } => self.throttler.key_press(&key, &modifiers),
            RawEvent::Text { text } => Some(ViewerMessage::TypeText { text }),
        }
    }
}

impl Default for InputTranslator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
