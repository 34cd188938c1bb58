//! # castlink-core
//!
//! Core library for castlink: low-latency screen and audio streaming
//! from one host to many viewers over a persistent duplex connection,
//! with optional remote mouse/keyboard control.
//!
//! This crate contains:
//! - **Data model**: `Frame`, `AudioChunk`, `CaptureSettings`, session state
//! - **Wire protocol**: `HostMessage` / `ViewerMessage` JSON message set,
//!   `MessageCodec` for framed TCP I/O via `tokio_util`, `Channel` plumbing
//! - **Capture**: timer-driven capture loop with single-flight encode guard
//! - **Broadcast**: `Session` — viewer registry, last-frame retention,
//!   debounced capture lifecycle, remote-control state
//! - **Render**: staleness-filtered frame renderer with a reused decode buffer
//! - **Jitter**: clock-driven audio jitter buffer and its async driver
//! - **Input**: coordinate mapper, move throttler, gated input injection
//! - **Error**: `CastError` — typed, `thiserror`-based error hierarchy
//!
//! ```text
//! HOST                                        VIEWER
//! ┌─────────────────────────┐                ┌──────────────────────┐
//! │ CaptureLoop             │                │ FrameRenderer        │
//! │   ↓                     │   TCP/JSON     │ JitterBuffer         │
//! │ Session (fan-out)       │ ──────────►    │   ↓                  │
//! │ RemoteControl           │ ◄──────────    │ InputThrottler       │
//! └─────────────────────────┘    input       └──────────────────────┘
//! ```

pub mod broadcast;
pub mod capture;
pub mod channel;
pub mod codec;
pub mod error;
pub mod frame;
pub mod inject;
pub mod jitter;
pub mod mapper;
pub mod message;
pub mod render;
pub mod throttle;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use broadcast::{CaptureControl, Session, ViewerId};
pub use capture::{CaptureEvent, CaptureInfo, CaptureLoop, FrameEncoder, RawImage, ScreenGrabber};
pub use channel::{Channel, HostChannel, ViewerChannel};
pub use codec::{MAX_WIRE_FRAME, MessageCodec};
pub use error::CastError;
pub use frame::{
    AudioChunk, CaptureSettings, CaptureState, Frame, RemoteControlState, ScreenSize,
    SettingsUpdate,
};
pub use inject::{InputBackend, RemoteControl};
pub use jitter::{AudioSink, JitterBuffer, JitterCommand, PlaybackHandle, run_jitter};
pub use mapper::{MappedPointer, content_rect, map_pointer};
pub use message::{
    ErrorKind, HostMessage, KeyModifier, MouseButton, StatusSnapshot, ViewerMessage,
};
pub use render::{FrameRenderer, PaintSurface};
pub use throttle::{InputThrottler, SurfaceGeometry};
