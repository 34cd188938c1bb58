//! Host service core logic.
//!
//! Owns the session context, the capture loop and the remote-control
//! gate, and runs the TCP accept loop for viewer connections.
//!
//! Lifecycle: the first viewer to join starts capture; the last one to
//! leave stops it after the session's debounce window. A permission
//! failure on start is broadcast as `capture-error` with remediation
//! text and is never retried automatically.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use castlink_core::capture::{CaptureEvent, CaptureLoop};
use castlink_core::{
    CaptureControl, CaptureState, CastError, ErrorKind, HostChannel, HostMessage, InputBackend,
    RemoteControl, ScreenGrabber, Session, ViewerMessage,
};

use crate::audio::SystemAudioSource;
use crate::backend::{NullBackend, UinputBackend};
use crate::config::HostConfig;
use crate::grabber::ScrapGrabber;

/// The top-level host service.
pub struct HostService {
    config: HostConfig,
    session: Arc<Session>,
    control_rx: Option<tokio::sync::mpsc::Receiver<CaptureControl>>,
    capture: Arc<CaptureLoop<ScrapGrabber>>,
    grabber: Arc<ScrapGrabber>,
    remote: Arc<Mutex<RemoteControl<Box<dyn InputBackend>>>>,
    event_rx: Option<tokio::sync::mpsc::Receiver<CaptureEvent>>,
}

impl HostService {
    /// Wire up the service. A missing input backend degrades to
    /// view-only sessions; capture and audio problems surface later as
    /// viewer-visible errors.
    pub fn new(config: HostConfig) -> Self {
        let (session, control_rx) = Session::new();
        let grabber = Arc::new(ScrapGrabber::spawn());
        let (event_tx, event_rx) = tokio::sync::mpsc::channel(64);
        let capture = Arc::new(CaptureLoop::new(Arc::clone(&grabber), event_tx));

        let backend: Box<dyn InputBackend> = match UinputBackend::new() {
            Ok(backend) => Box::new(backend),
            Err(e) => {
                warn!("input injection unavailable, sessions are view-only: {e}");
                Box::new(NullBackend)
            }
        };
        let remote = Arc::new(Mutex::new(RemoteControl::new(backend)));

        Self {
            config,
            session,
            control_rx: Some(control_rx),
            capture,
            grabber,
            remote,
            event_rx: Some(event_rx),
        }
    }

    /// Run until the process is stopped.
    pub async fn run(mut self) -> Result<(), CastError> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.network.listen_port)
            .parse()
            .map_err(|e| CastError::Other(format!("bad listen address: {e}")))?;
        let listener = TcpListener::bind(addr).await?;
        info!("host listening on {addr}");

        self.spawn_capture_controller();
        self.spawn_frame_pump();
        if self.config.audio.enabled {
            self.spawn_audio_pump();
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            info!("viewer connected from {peer}");
            self.spawn_viewer(stream, peer);
        }
    }

    // ── Background tasks ─────────────────────────────────────────

    /// Starts/stops the capture loop on viewer-count transitions.
    fn spawn_capture_controller(&mut self) {
        let mut control_rx = self.control_rx.take().expect("run called once");
        let session = Arc::clone(&self.session);
        let capture = Arc::clone(&self.capture);
        let settings = self.config.to_capture_settings();

        tokio::spawn(async move {
            while let Some(command) = control_rx.recv().await {
                match command {
                    CaptureControl::Start => match capture.start(settings).await {
                        Ok(info) => {
                            session.set_host_screen(info.screen);
                            session.set_capture_state(CaptureState::Capturing);
                            session.broadcast(HostMessage::CaptureStarted);
                            session.broadcast(HostMessage::CaptureStatus(
                                session.status_snapshot(&capture.settings()),
                            ));
                            info!(
                                width = info.screen.width,
                                height = info.screen.height,
                                "capture started"
                            );
                        }
                        Err(e) => {
                            error!("capture start failed: {e}");
                            session.broadcast(HostMessage::CaptureError {
                                message: e.to_string(),
                                kind: if e.is_permission() {
                                    ErrorKind::PermissionError
                                } else {
                                    ErrorKind::CaptureError
                                },
                            });
                        }
                    },
                    CaptureControl::Stop => {
                        capture.stop();
                        session.set_capture_state(CaptureState::Idle);
                        session.broadcast(HostMessage::CaptureStopped);
                        info!("capture stopped (no viewers)");
                    }
                }
            }
        });
    }

    /// Fans captured frames out and relays fatal capture failures.
    fn spawn_frame_pump(&mut self) {
        let mut event_rx = self.event_rx.take().expect("run called once");
        let session = Arc::clone(&self.session);

        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match event {
                    CaptureEvent::Frame(frame) => session.publish_frame(frame),
                    CaptureEvent::Fatal(e) => {
                        error!("capture died: {e}");
                        session.set_capture_state(CaptureState::Idle);
                        session.broadcast(HostMessage::CaptureError {
                            message: e.to_string(),
                            kind: if e.is_permission() {
                                ErrorKind::PermissionError
                            } else {
                                ErrorKind::CaptureError
                            },
                        });
                        session.broadcast(HostMessage::CaptureStopped);
                    }
                }
            }
        });
    }

    /// Broadcasts system audio chunks to all viewers.
    fn spawn_audio_pump(&self) {
        let session = Arc::clone(&self.session);
        match SystemAudioSource::start(&self.config.audio) {
            Ok((source, mut chunks)) => {
                tokio::spawn(async move {
                    // Keep the stream alive for the life of the pump.
                    let _source = source;
                    while let Some(chunk) = chunks.recv().await {
                        if session.viewer_count() > 0 {
                            session.broadcast(HostMessage::from_audio(&chunk));
                        }
                    }
                });
            }
            Err(e) => {
                // Video still streams without sound.
                warn!("system audio unavailable: {e}");
            }
        }
    }

    // ── Per-viewer handling ──────────────────────────────────────

    fn spawn_viewer(&self, stream: TcpStream, peer: SocketAddr) {
        let session = Arc::clone(&self.session);
        let capture = Arc::clone(&self.capture);
        let grabber = Arc::clone(&self.grabber);
        let remote = Arc::clone(&self.remote);
        let remote_allowed = self.config.remote_control.allowed;

        tokio::spawn(async move {
            let mut channel = HostChannel::new(stream);
            let viewer = session.register_viewer(channel.sender());

            // Replay the current picture immediately, then the status.
            if let Some(frame) = session.last_frame() {
                session.send_to(viewer, HostMessage::from_frame(&frame));
            }
            session.send_to(
                viewer,
                HostMessage::CaptureStatus(session.status_snapshot(&capture.settings())),
            );

            while let Some(message) = channel.recv().await {
                match message {
                    ViewerMessage::EnableRemoteControl => {
                        if !remote_allowed {
                            debug!("viewer {viewer} asked for remote control; disabled by config");
                            session.send_to(
                                viewer,
                                HostMessage::RemoteControlStatus { enabled: false },
                            );
                            continue;
                        }
                        // Refresh the host screen size on every enable;
                        // displays can change between sessions.
                        let settings = capture.settings();
                        let screen = match grabber.screen_size(settings.screen_index).await {
                            Ok(size) => size,
                            Err(e) => {
                                warn!("screen size query failed: {e}");
                                session.remote_control().host_screen
                            }
                        };
                        remote.lock().unwrap().enable(screen);
                        session.enable_remote_control(screen);
                        info!(viewer, "remote control enabled");
                    }
                    ViewerMessage::DisableRemoteControl => {
                        remote.lock().unwrap().disable();
                        session.disable_remote_control();
                        info!(viewer, "remote control disabled");
                    }
                    command => {
                        remote.lock().unwrap().apply(&command, Instant::now());
                    }
                }
            }

            info!("viewer {viewer} ({peer}) disconnected");
            session.unregister_viewer(viewer);
        });
    }
}

// ── Tests ────────────────────────────────────────────────────────
