//! Newline-delimited JSON framing for the viewer channel.
//!
//! Each wire frame is one JSON document followed by `\n`. Screen
//! frames carry base64 JPEG payloads, so the frame limit is generous
//! but still bounded to keep a malformed peer from ballooning memory.

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CastError;

/// Maximum size of a single wire frame.
pub const MAX_WIRE_FRAME: usize = 32 * 1024 * 1024;

/// Serde-backed line codec, generic over the outbound and inbound
/// message types (they differ per side of the connection).
pub struct MessageCodec<Tx, Rx> {
    _marker: PhantomData<(Tx, Rx)>,
}

impl<Tx, Rx> MessageCodec<Tx, Rx> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Tx, Rx> Default for MessageCodec<Tx, Rx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tx, Rx> tokio_util::codec::Decoder for MessageCodec<Tx, Rx>
where
    Rx: DeserializeOwned,
{
    type Item = Rx;
    type Error = CastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > MAX_WIRE_FRAME {
                return Err(CastError::FrameTooLarge {
                    size: src.len(),
                    max: MAX_WIRE_FRAME,
                });
            }
            return Ok(None);
        };

        let line = src.split_to(newline + 1);
        let message = serde_json::from_slice(&line[..newline])?;
        Ok(Some(message))
    }
}

impl<Tx, Rx> tokio_util::codec::Encoder<Tx> for MessageCodec<Tx, Rx>
where
    Tx: Serialize,
{
    type Error = CastError;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = serde_json::to_vec(&item)?;
        if encoded.len() > MAX_WIRE_FRAME {
            return Err(CastError::FrameTooLarge {
                size: encoded.len(),
                max: MAX_WIRE_FRAME,
            });
        }
        dst.reserve(encoded.len() + 1);
        dst.put_slice(&encoded);
        dst.put_u8(b'\n');
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HostMessage, ViewerMessage};
    use tokio_util::codec::{Decoder, Encoder};

    type HostSide = MessageCodec<HostMessage, ViewerMessage>;
    type ViewerSide = MessageCodec<ViewerMessage, HostMessage>;

    #[test]
    fn encode_then_decode() {
        let mut host = HostSide::new();
        let mut viewer = ViewerSide::new();

        let mut buf = BytesMut::new();
        host.encode(HostMessage::CaptureStarted, &mut buf).unwrap();
        host.encode(
            HostMessage::RemoteControlStatus { enabled: true },
            &mut buf,
        )
        .unwrap();

        let first = viewer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, HostMessage::CaptureStarted);
        let second = viewer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, HostMessage::RemoteControlStatus { enabled: true });
        assert!(viewer.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut viewer = ViewerSide::new();
        let mut buf = BytesMut::from(&br#"{"type":"capture-sta"#[..]);
        assert!(viewer.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"rted\"}\n");
        let msg = viewer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, HostMessage::CaptureStarted);
    }

    #[test]
    fn garbage_line_is_an_error() {
        let mut viewer = ViewerSide::new();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        assert!(viewer.decode(&mut buf).is_err());
    }

    #[test]
    fn unterminated_oversize_frame_rejected() {
        let mut viewer = ViewerSide::new();
        let mut buf = BytesMut::new();
        buf.resize(MAX_WIRE_FRAME + 1, b'x');
        assert!(matches!(
            viewer.decode(&mut buf),
            Err(CastError::FrameTooLarge { .. })
        ));
    }
}
