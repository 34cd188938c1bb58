//! Domain-specific error types for the castlink pipeline.
//!
//! All fallible operations return `Result<T, CastError>`.
//! The taxonomy separates errors by blast radius: permission failures
//! are fatal to starting capture and surfaced to every viewer; per-tick
//! capture failures and injection failures are logged and swallowed at
//! their call sites; transport failures stay local to one viewer.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the castlink pipeline.
#[derive(Debug, Error)]
pub enum CastError {
    // ── Capture Errors ───────────────────────────────────────────
    /// The OS denied screen or audio capture. Fatal to starting the
    /// capture loop; never retried automatically.
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    /// A single grab or encode failed. The tick is skipped and the
    /// loop continues.
    #[error("capture failed: {0}")]
    Capture(String),

    /// JPEG encoding or decoding of a frame payload failed.
    #[error("image codec error: {0}")]
    Encoding(String),

    // ── Input Errors ─────────────────────────────────────────────
    /// Replaying an input event on the host OS failed. Logged and
    /// swallowed; never disables remote control.
    #[error("input injection failed: {0}")]
    Injection(String),

    // ── Audio Errors ─────────────────────────────────────────────
    /// An audio device could not be opened or a stream failed.
    #[error("audio device error: {0}")]
    Audio(String),

    // ── Wire Errors ──────────────────────────────────────────────
    /// A message could not be serialized or deserialized.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// A wire frame exceeded the codec limit.
    #[error("wire frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A base64 payload field could not be decoded.
    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error. Isolated to the viewer
    /// whose connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl CastError {
    /// Returns `true` for permission-class failures, which must abort
    /// capture start and be broadcast to all viewers with remediation
    /// instructions.
    pub fn is_permission(&self) -> bool {
        matches!(self, CastError::PermissionDenied(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for CastError {
    fn from(s: String) -> Self {
        CastError::Other(s)
    }
}

impl From<&str> for CastError {
    fn from(s: &str) -> Self {
        CastError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CastError::ChannelClosed
    }
}
