//! Duplex message channel over a TCP stream.
//!
//! Wraps the stream in a [`MessageCodec`] and bridges it to the caller
//! through bounded mpsc channels, with one background writer task and
//! one background reader task. The write path is fire-and-forget from
//! the session's perspective: a slow peer fills its own buffer and
//! loses messages without blocking anyone else.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::codec::MessageCodec;
use crate::error::CastError;
use crate::message::{HostMessage, ViewerMessage};

/// Outbound buffer depth per connection. When full, new messages for
/// this peer are dropped rather than queued without bound.
const SEND_BUFFER: usize = 64;

/// A bidirectional message channel to one peer.
///
/// `Tx` is the locally sent message type, `Rx` the received one.
pub struct Channel<Tx, Rx> {
    tx: mpsc::Sender<Tx>,
    rx: mpsc::Receiver<Rx>,
}

/// Host side of a viewer connection.
pub type HostChannel = Channel<HostMessage, ViewerMessage>;
/// Viewer side of a host connection.
pub type ViewerChannel = Channel<ViewerMessage, HostMessage>;

impl<Tx, Rx> Channel<Tx, Rx>
where
    Tx: Serialize + Send + 'static,
    Rx: DeserializeOwned + Send + 'static,
{
    /// Wrap an established stream, spawning the reader/writer tasks.
    pub fn new(stream: TcpStream) -> Self {
        let (mut net_writer, mut net_reader) =
            Framed::new(stream, MessageCodec::<Tx, Rx>::new()).split();

        let (user_tx, mut outbound_rx) = mpsc::channel::<Tx>(SEND_BUFFER);
        let (inbound_tx, user_rx) = mpsc::channel::<Rx>(SEND_BUFFER);

        // Writer task: user → network. Shuts the write half down on
        // exit so the peer observes EOF instead of a half-open socket.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = net_writer.send(message).await {
                    debug!("channel write failed: {e}");
                    break;
                }
            }
            let _ = net_writer.close().await;
        });

        // Reader task: network → user.
        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            // Receiver dropped; stop reading.
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("channel read failed: {e}");
                        break;
                    }
                }
            }
            trace!("channel reader finished");
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    /// Connect to a remote peer.
    pub async fn connect(addr: &str) -> Result<Self, CastError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    /// Queue a message for sending.
    pub async fn send(&self, message: Tx) -> Result<(), CastError> {
        self.tx.send(message).await.map_err(|_| CastError::ChannelClosed)
    }

    /// Clone of the outbound sender, for fan-out registries.
    pub fn sender(&self) -> mpsc::Sender<Tx> {
        self.tx.clone()
    }

    /// Receive the next inbound message. `None` means the peer is gone.
    pub async fn recv(&mut self) -> Option<Rx> {
        self.rx.recv().await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn duplex_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            HostChannel::new(stream)
        });

        let mut viewer = ViewerChannel::connect(&addr.to_string()).await.unwrap();
        let mut host = accept.await.unwrap();

        host.send(HostMessage::CaptureStarted).await.unwrap();
        viewer.send(ViewerMessage::EnableRemoteControl).await.unwrap();

        assert_eq!(viewer.recv().await.unwrap(), HostMessage::CaptureStarted);
        assert_eq!(host.recv().await.unwrap(), ViewerMessage::EnableRemoteControl);
    }

    #[tokio::test]
    async fn recv_returns_none_after_peer_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            HostChannel::new(stream)
        });

        let mut viewer = ViewerChannel::connect(&addr.to_string()).await.unwrap();
        let host = accept.await.unwrap();
        drop(host);

        assert!(viewer.recv().await.is_none());
    }
}
