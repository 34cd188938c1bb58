//! Viewer session: message dispatch loop.
//!
//! Connects to the host, feeds frames through the staleness-filtered
//! renderer, pushes audio chunks at the jitter driver and surfaces
//! capture state to the user. Errors that belong to the shared capture
//! pipeline arrive as messages (`capture-error`), not as transport
//! failures.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use castlink_core::jitter::{JitterBuffer, JitterCommand, run_jitter};
use castlink_core::{
    AudioChunk, ErrorKind, Frame, FrameRenderer, HostMessage, ViewerChannel, ViewerMessage,
};

use crate::audio::CpalSink;
use crate::config::ViewerConfig;
use crate::input::InputTranslator;
use crate::surface::MemorySurface;

/// Step-by-step remediation shown when the host reports a
/// permission-class capture failure.
pub const PERMISSION_INSTRUCTIONS: &str = "\
The host cannot record its screen. On the HOST machine:
  1. Open System Settings (System Preferences).
  2. Go to Privacy & Security > Screen Recording.
  3. Enable the castlink host application.
  4. Restart the castlink host.
Then reconnect this viewer.";

/// How often render statistics are logged.
const STATS_PERIOD: Duration = Duration::from_secs(5);

/// Run the viewer session until the host disconnects.
pub async fn run(config: ViewerConfig) -> Result<(), castlink_core::CastError> {
    let mut channel = ViewerChannel::connect(&config.connection.host).await?;
    info!("connected to {}; waiting for the stream to start", config.connection.host);

    let mut renderer = FrameRenderer::new(MemorySurface::new());
    let mut translator = InputTranslator::new();
    let audio_tx = if config.audio.enabled {
        start_audio()
    } else {
        None
    };

    if config.remote_control.request_on_connect {
        channel.send(ViewerMessage::EnableRemoteControl).await?;
    }

    let mut stats_interval = tokio::time::interval(STATS_PERIOD);
    stats_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut frames_received: u64 = 0;

    loop {
        tokio::select! {
            message = channel.recv() => {
                let Some(message) = message else {
                    info!("host disconnected");
                    break;
                };
                handle_message(
                    message,
                    &mut renderer,
                    &mut translator,
                    &audio_tx,
                    &mut frames_received,
                )
                .await;
            }
            _ = stats_interval.tick() => {
                if frames_received > 0 {
                    debug!(
                        received = frames_received,
                        painted = renderer.surface().frames_painted(),
                        last_sequence = renderer.last_sequence(),
                        "render stats"
                    );
                }
            }
        }
    }

    Ok(())
}

/// Start the playback pipeline.
///
/// cpal streams are not `Send`, so the sink and its jitter driver live
/// on a dedicated thread with their own single-threaded runtime; the
/// session only holds the command channel.
fn start_audio() -> Option<mpsc::Sender<JitterCommand>> {
    let (tx, rx) = mpsc::channel(64);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let spawned = std::thread::Builder::new()
        .name("castlink-audio".into())
        .spawn(move || {
            let sink = match CpalSink::new() {
                Ok(sink) => {
                    let _ = ready_tx.send(Ok(()));
                    sink
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime.block_on(run_jitter(JitterBuffer::new(sink), rx)),
                Err(e) => warn!("audio runtime failed: {e}"),
            }
        });
    if spawned.is_err() {
        warn!("audio thread could not be spawned");
        return None;
    }

    match ready_rx.recv() {
        Ok(Ok(())) => Some(tx),
        Ok(Err(e)) => {
            warn!("audio playback unavailable: {e}");
            None
        }
        Err(_) => None,
    }
}

async fn handle_message(
    message: HostMessage,
    renderer: &mut FrameRenderer<MemorySurface>,
    translator: &mut InputTranslator,
    audio_tx: &Option<mpsc::Sender<JitterCommand>>,
    frames_received: &mut u64,
) {
    match &message {
        HostMessage::ScreenFrame { .. } => {
            *frames_received += 1;
            match Frame::from_message(&message) {
                Ok(Some(frame)) => {
                    translator.set_frame(frame.width, frame.height);
                    // Headless: the picture is shown 1:1.
                    translator.set_view_box(frame.width as f64, frame.height as f64);
                    if let Err(e) = renderer.on_frame(&frame) {
                        warn!("frame decode failed: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("malformed screen frame: {e}"),
            }
        }
        HostMessage::AudioChunk { .. } => {
            let Some(tx) = audio_tx else { return };
            match AudioChunk::from_message(&message) {
                Ok(Some(chunk)) => {
                    if tx.send(JitterCommand::Chunk(chunk)).await.is_err() {
                        warn!("audio pipeline is gone");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("malformed audio chunk: {e}"),
            }
        }
        HostMessage::CaptureStarted => {
            // A fresh capture run may restart its sequence origin.
            renderer.reset();
            info!("host capture started");
        }
        HostMessage::CaptureStopped => {
            info!("host capture stopped");
        }
        HostMessage::CaptureStatus(snapshot) => {
            translator.set_host_screen(snapshot.screen_size);
            info!(
                capturing = snapshot.is_capturing,
                viewers = snapshot.connected_clients,
                remote_control = snapshot.remote_control_enabled,
                fps = snapshot.frame_rate,
                quality = snapshot.quality,
                scale = snapshot.scale,
                "capture status"
            );
        }
        HostMessage::CaptureError { message, kind } => match kind {
            ErrorKind::PermissionError => {
                error!("capture permission error: {message}");
                error!("{PERMISSION_INSTRUCTIONS}");
            }
            ErrorKind::CaptureError => {
                error!("capture error: {message}");
            }
        },
        HostMessage::RemoteControlStatus { enabled } => {
            translator.set_active(*enabled);
            info!(enabled, "remote control status changed");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_names_the_permission() {
        assert!(PERMISSION_INSTRUCTIONS.contains("Screen Recording"));
        assert!(PERMISSION_INSTRUCTIONS.contains("Restart"));
    }

    #[tokio::test]
    async fn frames_flow_into_renderer_and_stale_ones_do_not() {
        use castlink_core::capture::{FrameEncoder, RawImage};

        let mut renderer = FrameRenderer::new(MemorySurface::new());
        let mut translator = InputTranslator::new();
        let mut received = 0;

        let jpeg = |sequence| {
            let raw = RawImage::packed(4, 4, vec![0x20; 64]);
            let encoded = FrameEncoder::encode(&raw, 80, 1.0).unwrap();
            HostMessage::from_frame(&Frame {
                payload: encoded.jpeg.into(),
                width: encoded.width,
                height: encoded.height,
                sequence,
            })
        };

        for sequence in [5, 3, 6] {
            handle_message(
                jpeg(sequence),
                &mut renderer,
                &mut translator,
                &None,
                &mut received,
            )
            .await;
        }

        assert_eq!(received, 3);
        assert_eq!(renderer.surface().frames_painted(), 2); // 5 and 6
        assert_eq!(renderer.last_sequence(), 6);
    }

    #[tokio::test]
    async fn capture_started_resets_sequence_filter() {
        use castlink_core::capture::{FrameEncoder, RawImage};

        let mut renderer = FrameRenderer::new(MemorySurface::new());
        let mut translator = InputTranslator::new();
        let mut received = 0;

        let raw = RawImage::packed(4, 4, vec![0x20; 64]);
        let encoded = FrameEncoder::encode(&raw, 80, 1.0).unwrap();
        let frame = |sequence| {
            HostMessage::from_frame(&Frame {
                payload: encoded.jpeg.clone().into(),
                width: encoded.width,
                height: encoded.height,
                sequence,
            })
        };

        handle_message(frame(40), &mut renderer, &mut translator, &None, &mut received).await;
        handle_message(
            HostMessage::CaptureStarted,
            &mut renderer,
            &mut translator,
            &None,
            &mut received,
        )
        .await;
        handle_message(frame(1), &mut renderer, &mut translator, &None, &mut received).await;

        assert_eq!(renderer.surface().frames_painted(), 2);
        assert_eq!(renderer.last_sequence(), 1);
    }

    #[tokio::test]
    async fn session_state_feeds_the_input_translator() {
        use castlink_core::StatusSnapshot;
        use castlink_core::ScreenSize;

        let mut renderer = FrameRenderer::new(MemorySurface::new());
        let mut translator = InputTranslator::new();
        let mut received = 0;

        handle_message(
            HostMessage::CaptureStatus(StatusSnapshot {
                is_capturing: true,
                connected_clients: 1,
                remote_control_enabled: false,
                screen_size: ScreenSize::new(1920, 1080),
                frame_rate: 30,
                quality: 80,
                scale: 0.5,
            }),
            &mut renderer,
            &mut translator,
            &None,
            &mut received,
        )
        .await;
        assert!(!translator.is_active());

        handle_message(
            HostMessage::RemoteControlStatus { enabled: true },
            &mut renderer,
            &mut translator,
            &None,
            &mut received,
        )
        .await;
        assert!(translator.is_active());
    }
}
