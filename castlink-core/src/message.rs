//! Wire message set for the viewer duplex channel.
//!
//! One JSON message per line, tagged by `type`:
//!
//! ```text
//! Host ──{"type":"screen-frame","d":"<base64 jpeg>","w":1280,"h":720,"t":41}──► Viewer
//! Host ──{"type":"audio-chunk","audio":"<base64 pcm16le>","sampleRate":48000,"channels":2}──► Viewer
//! Host ──{"type":"capture-status",...}/{"type":"capture-error",...}──► Viewer
//!
//! Viewer ──{"type":"mouse-move","x":512.0,"y":300.0,"scaleX":0.66,"scaleY":0.66}──► Host
//! Viewer ──{"type":"key-press","key":"a","modifiers":["control"]}──► Host
//! ```
//!
//! Frame payloads are JPEG at post-downsample dimensions; audio
//! payloads are interleaved little-endian 16-bit PCM with explicit
//! sample rate and channel count per chunk.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CastError;
use crate::frame::{AudioChunk, Frame, ScreenSize};

// ── Host → Viewer ────────────────────────────────────────────────

/// Messages sent from the host to each viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    /// The capture loop started.
    CaptureStarted,
    /// The capture loop stopped.
    CaptureStopped,
    /// Snapshot of the current capture configuration.
    CaptureStatus(StatusSnapshot),
    /// A capture failure that affects the shared pipeline. The error
    /// class is carried in `kind` (`permission_error` or
    /// `capture_error`); the `type` key is the message tag.
    CaptureError { message: String, kind: ErrorKind },
    /// Remote control was toggled by some viewer.
    RemoteControlStatus { enabled: bool },
    /// One encoded screen frame.
    ScreenFrame {
        /// Base64-encoded JPEG payload.
        d: String,
        /// Width in pixels (post-downsample).
        w: u32,
        /// Height in pixels (post-downsample).
        h: u32,
        /// Sequence stamp, strictly increasing per session.
        t: u64,
    },
    /// One PCM16 audio chunk.
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        /// Base64-encoded little-endian PCM16 samples.
        audio: String,
        sample_rate: u32,
        channels: u16,
    },
}

/// Classification carried by [`HostMessage::CaptureError`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionError,
    CaptureError,
}

/// Current capture configuration and session counters.
///
/// Also served by the synchronous status query interface; reads have
/// no side effects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_capturing: bool,
    pub connected_clients: usize,
    pub remote_control_enabled: bool,
    pub screen_size: ScreenSize,
    pub frame_rate: u32,
    pub quality: u8,
    pub scale: f32,
}

// ── Viewer → Host ────────────────────────────────────────────────

/// Messages sent from a viewer to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ViewerMessage {
    EnableRemoteControl,
    DisableRemoteControl,
    /// Pointer move in frame-pixel space, with the frame→host scale
    /// factors so the host can recover host-screen pixels.
    #[serde(rename_all = "camelCase")]
    MouseMove {
        x: f64,
        y: f64,
        scale_x: f64,
        scale_y: f64,
    },
    MouseClick { button: MouseButton, double: bool },
    MouseDown { button: MouseButton },
    MouseUp { button: MouseButton },
    #[serde(rename_all = "camelCase")]
    MouseScroll { delta_y: f64 },
    KeyPress {
        key: String,
        modifiers: Vec<KeyModifier>,
    },
    TypeText { text: String },
}

/// Pointer button identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Keyboard modifier keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KeyModifier {
    Control,
    Shift,
    Alt,
    Command,
}

// ── Payload conversions ──────────────────────────────────────────

impl HostMessage {
    /// Wrap an encoded [`Frame`] for transmission.
    pub fn from_frame(frame: &Frame) -> Self {
        HostMessage::ScreenFrame {
            d: BASE64.encode(&frame.payload),
            w: frame.width,
            h: frame.height,
            t: frame.sequence,
        }
    }

    /// Wrap an [`AudioChunk`] for transmission.
    pub fn from_audio(chunk: &AudioChunk) -> Self {
        let mut bytes = Vec::with_capacity(chunk.samples.len() * 2);
        for sample in &chunk.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        HostMessage::AudioChunk {
            audio: BASE64.encode(&bytes),
            sample_rate: chunk.sample_rate,
            channels: chunk.channels,
        }
    }
}

impl Frame {
    /// Rebuild a frame from a received `screen-frame` message.
    ///
    /// Returns `None` for any other message kind.
    pub fn from_message(message: &HostMessage) -> Result<Option<Self>, CastError> {
        let HostMessage::ScreenFrame { d, w, h, t } = message else {
            return Ok(None);
        };
        let payload = BASE64.decode(d)?;
        Ok(Some(Frame {
            payload: Bytes::from(payload),
            width: *w,
            height: *h,
            sequence: *t,
        }))
    }
}

impl AudioChunk {
    /// Rebuild a chunk from a received `audio-chunk` message.
    ///
    /// Returns `None` for any other message kind. An odd trailing byte
    /// is rejected as a malformed payload.
    pub fn from_message(message: &HostMessage) -> Result<Option<Self>, CastError> {
        let HostMessage::AudioChunk {
            audio,
            sample_rate,
            channels,
        } = message
        else {
            return Ok(None);
        };
        let bytes = BASE64.decode(audio)?;
        if bytes.len() % 2 != 0 {
            return Err(CastError::Other(format!(
                "pcm16 payload has odd length {}",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Some(AudioChunk {
            samples,
            sample_rate: *sample_rate,
            channels: *channels,
        }))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_message_tags() {
        let json = serde_json::to_string(&HostMessage::CaptureStarted).unwrap();
        assert_eq!(json, r#"{"type":"capture-started"}"#);

        let json = serde_json::to_string(&HostMessage::RemoteControlStatus { enabled: true })
            .unwrap();
        assert!(json.contains(r#""type":"remote-control-status""#));
        assert!(json.contains(r#""enabled":true"#));
    }

    #[test]
    fn screen_frame_field_names() {
        let frame = Frame {
            payload: Bytes::from_static(&[0xFF, 0xD8, 0xFF]),
            width: 640,
            height: 360,
            sequence: 7,
        };
        let json = serde_json::to_string(&HostMessage::from_frame(&frame)).unwrap();
        assert!(json.contains(r#""type":"screen-frame""#));
        assert!(json.contains(r#""d":""#));
        assert!(json.contains(r#""w":640"#));
        assert!(json.contains(r#""h":360"#));
        assert!(json.contains(r#""t":7"#));
    }

    #[test]
    fn frame_roundtrip_through_message() {
        let frame = Frame {
            payload: Bytes::from(vec![1u8, 2, 3, 4, 5]),
            width: 100,
            height: 50,
            sequence: 42,
        };
        let msg = HostMessage::from_frame(&frame);
        let decoded = Frame::from_message(&msg).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn audio_chunk_roundtrip_preserves_sample_order() {
        let chunk = AudioChunk {
            samples: vec![-32768, -1, 0, 1, 32767, 256],
            sample_rate: 48_000,
            channels: 2,
        };
        let msg = HostMessage::from_audio(&chunk);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""sampleRate":48000"#));
        assert!(json.contains(r#""channels":2"#));

        let parsed: HostMessage = serde_json::from_str(&json).unwrap();
        let decoded = AudioChunk::from_message(&parsed).unwrap().unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn audio_chunk_little_endian_layout() {
        let chunk = AudioChunk {
            samples: vec![0x0102],
            sample_rate: 8000,
            channels: 1,
        };
        let HostMessage::AudioChunk { audio, .. } = HostMessage::from_audio(&chunk) else {
            panic!("wrong variant");
        };
        assert_eq!(BASE64.decode(audio).unwrap(), vec![0x02, 0x01]);
    }

    #[test]
    fn viewer_message_tags() {
        let json = serde_json::to_string(&ViewerMessage::EnableRemoteControl).unwrap();
        assert_eq!(json, r#"{"type":"enable-remote-control"}"#);

        let json = serde_json::to_string(&ViewerMessage::MouseMove {
            x: 10.0,
            y: 20.0,
            scale_x: 0.5,
            scale_y: 0.5,
        })
        .unwrap();
        assert!(json.contains(r#""type":"mouse-move""#));
        assert!(json.contains(r#""scaleX":0.5"#));
        assert!(json.contains(r#""scaleY":0.5"#));

        let json = serde_json::to_string(&ViewerMessage::MouseScroll { delta_y: -3.0 }).unwrap();
        assert!(json.contains(r#""deltaY":-3.0"#));
    }

    #[test]
    fn key_press_modifiers_lowercase() {
        let json = serde_json::to_string(&ViewerMessage::KeyPress {
            key: "r".into(),
            modifiers: vec![KeyModifier::Control, KeyModifier::Shift],
        })
        .unwrap();
        assert!(json.contains(r#""modifiers":["control","shift"]"#));
    }

    #[test]
    fn capture_error_kind_values() {
        let json = serde_json::to_string(&HostMessage::CaptureError {
            message: "denied".into(),
            kind: ErrorKind::PermissionError,
        })
        .unwrap();
        assert!(json.contains(r#""kind":"permission_error""#));
    }

    #[test]
    fn status_snapshot_camel_case() {
        let snapshot = StatusSnapshot {
            is_capturing: true,
            connected_clients: 2,
            remote_control_enabled: false,
            screen_size: ScreenSize::new(1920, 1080),
            frame_rate: 30,
            quality: 80,
            scale: 0.5,
        };
        let json = serde_json::to_string(&HostMessage::CaptureStatus(snapshot)).unwrap();
        assert!(json.contains(r#""type":"capture-status""#));
        assert!(json.contains(r#""isCapturing":true"#));
        assert!(json.contains(r#""connectedClients":2"#));
        assert!(json.contains(r#""remoteControlEnabled":false"#));
        assert!(json.contains(r#""frameRate":30"#));
    }

    #[test]
    fn malformed_pcm_rejected() {
        let msg = HostMessage::AudioChunk {
            audio: BASE64.encode([1u8, 2, 3]), // odd length
            sample_rate: 48_000,
            channels: 1,
        };
        assert!(AudioChunk::from_message(&msg).is_err());
    }

    #[test]
    fn wrong_variant_yields_none() {
        assert!(Frame::from_message(&HostMessage::CaptureStopped)
            .unwrap()
            .is_none());
        assert!(AudioChunk::from_message(&HostMessage::CaptureStarted)
            .unwrap()
            .is_none());
    }
}
