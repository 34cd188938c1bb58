//! Host-side input replay, gated by the remote-control flag.
//!
//! [`RemoteControl`] converts viewer commands into calls on an
//! [`InputBackend`] — the contract for whatever OS facility actually
//! synthesizes events. Every operation is a no-op while disabled.
//! Backend failures are caught and logged per call: a single failed
//! injection never crashes the session and never disables remote
//! control.
//!
//! Mouse moves are re-throttled here with the same minimum-interval
//! policy the viewer applies, independently of the viewer's throttle
//! (defense against a misbehaving or multi-viewer client flooding
//! commands).

use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::CastError;
use crate::frame::ScreenSize;
use crate::message::{KeyModifier, MouseButton, ViewerMessage};
use crate::throttle::MOVE_INTERVAL;

// ── InputBackend ─────────────────────────────────────────────────

/// Contract the injector needs from "an input injector".
pub trait InputBackend: Send {
    fn move_mouse(&mut self, x: i32, y: i32) -> Result<(), CastError>;
    fn click(&mut self, button: MouseButton, double: bool) -> Result<(), CastError>;
    fn mouse_down(&mut self, button: MouseButton) -> Result<(), CastError>;
    fn mouse_up(&mut self, button: MouseButton) -> Result<(), CastError>;
    fn scroll(&mut self, delta_y: f64) -> Result<(), CastError>;
    fn key_tap(&mut self, key: &str, modifiers: &[KeyModifier]) -> Result<(), CastError>;
    fn type_text(&mut self, text: &str) -> Result<(), CastError>;
}

impl<B: InputBackend + ?Sized> InputBackend for Box<B> {
    fn move_mouse(&mut self, x: i32, y: i32) -> Result<(), CastError> {
        (**self).move_mouse(x, y)
    }
    fn click(&mut self, button: MouseButton, double: bool) -> Result<(), CastError> {
        (**self).click(button, double)
    }
    fn mouse_down(&mut self, button: MouseButton) -> Result<(), CastError> {
        (**self).mouse_down(button)
    }
    fn mouse_up(&mut self, button: MouseButton) -> Result<(), CastError> {
        (**self).mouse_up(button)
    }
    fn scroll(&mut self, delta_y: f64) -> Result<(), CastError> {
        (**self).scroll(delta_y)
    }
    fn key_tap(&mut self, key: &str, modifiers: &[KeyModifier]) -> Result<(), CastError> {
        (**self).key_tap(key, modifiers)
    }
    fn type_text(&mut self, text: &str) -> Result<(), CastError> {
        (**self).type_text(text)
    }
}

// ── RemoteControl ────────────────────────────────────────────────

/// Gated, throttled command replay onto an [`InputBackend`].
pub struct RemoteControl<B: InputBackend> {
    backend: B,
    enabled: bool,
    screen: ScreenSize,
    last_move: Option<Instant>,
    min_move_interval: Duration,
}

impl<B: InputBackend> RemoteControl<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            enabled: false,
            screen: ScreenSize::default(),
            last_move: None,
            min_move_interval: MOVE_INTERVAL,
        }
    }

    /// Enable replay. `screen` is the freshly queried host screen
    /// size — it must be re-read on every enable, since displays can
    /// change between sessions.
    pub fn enable(&mut self, screen: ScreenSize) {
        self.enabled = true;
        self.screen = screen;
        self.last_move = None;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    /// Dispatch one viewer command. No-op while disabled; backend
    /// errors are logged and swallowed.
    pub fn apply(&mut self, message: &ViewerMessage, now: Instant) {
        if !self.enabled {
            return;
        }
        let result = match message {
            ViewerMessage::MouseMove {
                x,
                y,
                scale_x,
                scale_y,
            } => self.move_mouse(*x, *y, *scale_x, *scale_y, now),
            ViewerMessage::MouseClick { button, double } => {
                self.backend.click(*button, *double)
            }
            ViewerMessage::MouseDown { button } => self.backend.mouse_down(*button),
            ViewerMessage::MouseUp { button } => self.backend.mouse_up(*button),
            ViewerMessage::MouseScroll { delta_y } => self.backend.scroll(*delta_y),
            ViewerMessage::KeyPress { key, modifiers } => {
                self.backend.key_tap(key, modifiers)
            }
            ViewerMessage::TypeText { text } => self.backend.type_text(text),
            ViewerMessage::EnableRemoteControl | ViewerMessage::DisableRemoteControl => Ok(()),
        };
        if let Err(e) = result {
            warn!("input injection failed: {e}");
        }
    }

    /// Frame pixels → host pixels → clamped backend move, re-throttled.
    fn move_mouse(
        &mut self,
        x: f64,
        y: f64,
        scale_x: f64,
        scale_y: f64,
        now: Instant,
    ) -> Result<(), CastError> {
        if let Some(last) = self.last_move {
            if now.duration_since(last) < self.min_move_interval {
                return Ok(()); // dropped, not queued
            }
        }
        if scale_x <= 0.0 || scale_y <= 0.0 {
            return Err(CastError::Injection(format!(
                "non-positive scale factors {scale_x}/{scale_y}"
            )));
        }
        self.last_move = Some(now);

        let host_x = (x / scale_x).round() as i64;
        let host_y = (y / scale_y).round() as i64;
        let host_x = host_x.clamp(0, self.screen.width.saturating_sub(1) as i64) as i32;
        let host_y = host_y.clamp(0, self.screen.height.saturating_sub(1) as i64) as i32;

        self.backend.move_mouse(host_x, host_y)
    }
}

// ── Tests ────────────────────────────────────────────────────────
