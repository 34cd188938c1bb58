//! Core data model: frames, audio chunks, capture settings and the
//! shared session state types.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── ScreenSize ───────────────────────────────────────────────────

/// Host screen dimensions in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One encoded still image of the screen.
///
/// Immutable once produced. Dimensions are the post-downsample
/// dimensions, not the native screen resolution. `sequence` is a
/// strictly increasing per-session counter; a frame whose sequence is
/// not greater than the last rendered one must never be painted.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Encoded JPEG bytes.
    pub payload: Bytes,
    /// Encoded width in pixels.
    pub width: u32,
    /// Encoded height in pixels.
    pub height: u32,
    /// Strictly increasing sequence number.
    pub sequence: u64,
}

// ── AudioChunk ───────────────────────────────────────────────────

/// A short burst of interleaved little-endian PCM16 audio.
///
/// Owned by the jitter buffer from arrival until played, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved samples (`frame_count() * channels` values).
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioChunk {
    /// Number of sample frames (one value per channel each).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

// ── CaptureSettings ──────────────────────────────────────────────

/// Frame-rate bounds accepted by [`SettingsUpdate`] validation.
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 240;

/// Capture configuration. Changes take effect on the next tick; a
/// frame-rate change restarts the capture timer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Target frames per second (1..=240).
    pub target_fps: u32,
    /// JPEG quality (1..=100).
    pub jpeg_quality: u8,
    /// Downsample factor applied to both dimensions (0 < f ≤ 1).
    pub downsample: f32,
    /// Screen index to capture (0 = primary).
    pub screen_index: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target_fps: 30,
            jpeg_quality: 80,
            downsample: 1.0,
            screen_index: 0,
        }
    }
}

impl CaptureSettings {
    /// Timer period derived from the target frame rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis((1000 / self.target_fps.max(1)) as u64)
    }

    /// Apply a partial update. Each field is validated independently;
    /// invalid fields are ignored, not fatal. Returns `true` if the
    /// frame rate changed (the caller must restart its timer).
    pub fn apply(&mut self, update: &SettingsUpdate) -> bool {
        let mut rate_changed = false;

        if let Some(fps) = update.target_fps {
            if (MIN_FPS..=MAX_FPS).contains(&fps) {
                rate_changed = fps != self.target_fps;
                self.target_fps = fps;
            } else {
                tracing::warn!(fps, "ignoring out-of-range frame rate");
            }
        }
        if let Some(q) = update.jpeg_quality {
            if (1..=100).contains(&q) {
                self.jpeg_quality = q;
            } else {
                tracing::warn!(quality = q, "ignoring out-of-range jpeg quality");
            }
        }
        if let Some(f) = update.downsample {
            if f > 0.0 && f <= 1.0 {
                self.downsample = f;
            } else {
                tracing::warn!(downsample = f, "ignoring out-of-range downsample factor");
            }
        }
        if let Some(idx) = update.screen_index {
            self.screen_index = idx;
        }

        rate_changed
    }
}

/// Partial settings change; `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub target_fps: Option<u32>,
    pub jpeg_quality: Option<u8>,
    pub downsample: Option<f32>,
    pub screen_index: Option<usize>,
}

// ── Session state ────────────────────────────────────────────────

/// Whether the host capture pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// No capture loop armed.
    #[default]
    Idle,
    /// The capture timer is running.
    Capturing,
}

/// Session-wide remote-control state.
///
/// Any connected viewer may toggle `enabled`; the change is broadcast
/// to all viewers. The host screen size is cached here and refreshed
/// whenever remote control is (re-)enabled, since displays can change
/// between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RemoteControlState {
    pub enabled: bool,
    pub host_screen: ScreenSize,
}

// ── Tests ────────────────────────────────────────────────────────
