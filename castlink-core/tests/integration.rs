//! End-to-end session tests: capture loop → session fan-out → TCP →
//! viewer channel → renderer, plus the remote-control return path.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use castlink_core::capture::{CaptureEvent, CaptureLoop, RawImage, ScreenGrabber};
use castlink_core::{
    CaptureControl, CaptureSettings, CaptureState, CastError, Frame, FrameRenderer, HostChannel,
    HostMessage, InputBackend, KeyModifier, MouseButton, PaintSurface, RemoteControl, ScreenSize,
    Session, ViewerChannel, ViewerMessage,
};

// ── Test doubles ─────────────────────────────────────────────────

struct TestGrabber;

#[async_trait]
impl ScreenGrabber for TestGrabber {
    async fn grab(&self, _screen: usize) -> Result<RawImage, CastError> {
        Ok(RawImage::packed(16, 8, vec![0x40; 16 * 8 * 4]))
    }

    async fn screen_size(&self, _screen: usize) -> Result<ScreenSize, CastError> {
        Ok(ScreenSize::new(16, 8))
    }
}

#[derive(Default)]
struct CountingBackend {
    calls: Arc<Mutex<Vec<String>>>,
}

impl InputBackend for CountingBackend {
    fn move_mouse(&mut self, x: i32, y: i32) -> Result<(), CastError> {
        self.calls.lock().unwrap().push(format!("move {x},{y}"));
        Ok(())
    }
    fn click(&mut self, _button: MouseButton, _double: bool) -> Result<(), CastError> {
        self.calls.lock().unwrap().push("click".into());
        Ok(())
    }
    fn mouse_down(&mut self, _button: MouseButton) -> Result<(), CastError> {
        self.calls.lock().unwrap().push("down".into());
        Ok(())
    }
    fn mouse_up(&mut self, _button: MouseButton) -> Result<(), CastError> {
        self.calls.lock().unwrap().push("up".into());
        Ok(())
    }
    fn scroll(&mut self, _delta_y: f64) -> Result<(), CastError> {
        self.calls.lock().unwrap().push("scroll".into());
        Ok(())
    }
    fn key_tap(&mut self, key: &str, _modifiers: &[KeyModifier]) -> Result<(), CastError> {
        self.calls.lock().unwrap().push(format!("key {key}"));
        Ok(())
    }
    fn type_text(&mut self, text: &str) -> Result<(), CastError> {
        self.calls.lock().unwrap().push(format!("text {text}"));
        Ok(())
    }
}

#[derive(Default)]
struct CountingSurface {
    painted: usize,
}

impl PaintSurface for CountingSurface {
    fn resize(&mut self, _width: u32, _height: u32) {}
    fn paint(&mut self, _rgb: &[u8], _width: u32, _height: u32) {
        self.painted += 1;
    }
}

// ── Miniature host wiring ────────────────────────────────────────

/// Wires a session, capture loop and remote control behind a TCP
/// listener the way the host service does, returning the bound
/// address and the injection call log.
async fn spawn_host() -> (std::net::SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (session, mut control_rx) = Session::with_debounce(Duration::from_millis(200));
    let grabber = Arc::new(TestGrabber);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let capture = Arc::new(CaptureLoop::new(Arc::clone(&grabber), event_tx));

    let backend = CountingBackend::default();
    let calls = Arc::clone(&backend.calls);
    let remote = Arc::new(Mutex::new(RemoteControl::new(backend)));

    // Capture lifecycle driven by viewer-count transitions.
    {
        let session = Arc::clone(&session);
        let capture = Arc::clone(&capture);
        tokio::spawn(async move {
            while let Some(command) = control_rx.recv().await {
                match command {
                    CaptureControl::Start => {
                        let settings = CaptureSettings {
                            target_fps: 60,
                            ..Default::default()
                        };
                        match capture.start(settings).await {
                            Ok(info) => {
                                session.set_host_screen(info.screen);
                                session.set_capture_state(CaptureState::Capturing);
                                session.broadcast(HostMessage::CaptureStarted);
                            }
                            Err(e) => {
                                session.broadcast(HostMessage::CaptureError {
                                    message: e.to_string(),
                                    kind: castlink_core::ErrorKind::CaptureError,
                                });
                            }
                        }
                    }
                    CaptureControl::Stop => {
                        capture.stop();
                        session.set_capture_state(CaptureState::Idle);
                        session.broadcast(HostMessage::CaptureStopped);
                    }
                }
            }
        });
    }

    // Frame pump.
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if let CaptureEvent::Frame(frame) = event {
                    session.publish_frame(frame);
                }
            }
        });
    }

    // Accept loop.
    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let mut channel = HostChannel::new(stream);
                let viewer = session.register_viewer(channel.sender());

                if let Some(frame) = session.last_frame() {
                    session.send_to(viewer, HostMessage::from_frame(&frame));
                }
                session.send_to(
                    viewer,
                    HostMessage::CaptureStatus(
                        session.status_snapshot(&CaptureSettings::default()),
                    ),
                );

                let session = Arc::clone(&session);
                let remote = Arc::clone(&remote);
                tokio::spawn(async move {
                    while let Some(message) = channel.recv().await {
                        match message {
                            ViewerMessage::EnableRemoteControl => {
                                let screen = session.remote_control().host_screen;
                                remote.lock().unwrap().enable(screen);
                                session.enable_remote_control(screen);
                            }
                            ViewerMessage::DisableRemoteControl => {
                                remote.lock().unwrap().disable();
                                session.disable_remote_control();
                            }
                            other => {
                                remote.lock().unwrap().apply(&other, Instant::now());
                            }
                        }
                    }
                    session.unregister_viewer(viewer);
                });
            }
        });
    }

    (addr, calls)
}

async fn recv_until<F>(viewer: &mut ViewerChannel, mut predicate: F) -> Option<HostMessage>
where
    F: FnMut(&HostMessage) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = viewer.recv().await {
            if predicate(&message) {
                return Some(message);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn viewer_join_starts_capture_and_receives_frames() {
    let (addr, _calls) = spawn_host().await;
    let mut viewer = ViewerChannel::connect(&addr.to_string()).await.unwrap();

    assert!(recv_until(&mut viewer, |m| matches!(m, HostMessage::CaptureStarted))
        .await
        .is_some());

    // Collect a few frames and feed them through the renderer: the
    // painted sequence must be strictly increasing even if the
    // transport duplicated anything.
    let mut renderer = FrameRenderer::new(CountingSurface::default());
    let mut accepted = 0;
    while accepted < 3 {
        let Some(message) = recv_until(&mut viewer, |m| {
            matches!(m, HostMessage::ScreenFrame { .. })
        })
        .await
        else {
            panic!("frame stream dried up");
        };
        let frame = Frame::from_message(&message).unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));
        if renderer.on_frame(&frame).unwrap() {
            accepted += 1;
        }
    }
    assert!(renderer.last_sequence() >= 3);
}

#[tokio::test]
async fn stale_frames_are_never_rendered() {
    let (addr, _calls) = spawn_host().await;
    let mut viewer = ViewerChannel::connect(&addr.to_string()).await.unwrap();

    let first = recv_until(&mut viewer, |m| matches!(m, HostMessage::ScreenFrame { .. }))
        .await
        .expect("no frame");
    let frame = Frame::from_message(&first).unwrap().unwrap();

    let mut renderer = FrameRenderer::new(CountingSurface::default());
    assert!(renderer.on_frame(&frame).unwrap());
    // A duplicate of the same frame must be a no-op.
    assert!(!renderer.on_frame(&frame).unwrap());
    assert_eq!(renderer.surface().painted, 1);
}

#[tokio::test]
async fn remote_control_round_trip() {
    let (addr, calls) = spawn_host().await;
    let mut viewer = ViewerChannel::connect(&addr.to_string()).await.unwrap();

    // Commands sent while disabled must not reach the backend.
    viewer
        .send(ViewerMessage::MouseClick {
            button: MouseButton::Left,
            double: false,
        })
        .await
        .unwrap();
    viewer
        .send(ViewerMessage::KeyPress {
            key: "a".into(),
            modifiers: vec![],
        })
        .await
        .unwrap();

    viewer.send(ViewerMessage::EnableRemoteControl).await.unwrap();
    let status = recv_until(&mut viewer, |m| {
        matches!(m, HostMessage::RemoteControlStatus { .. })
    })
    .await
    .expect("no remote-control-status");
    assert_eq!(status, HostMessage::RemoteControlStatus { enabled: true });

    assert!(calls.lock().unwrap().is_empty());

    viewer
        .send(ViewerMessage::MouseClick {
            button: MouseButton::Left,
            double: true,
        })
        .await
        .unwrap();
    viewer
        .send(ViewerMessage::TypeText { text: "hi".into() })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if calls.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("injector never called");

    let log = calls.lock().unwrap().clone();
    assert_eq!(log, vec!["click".to_string(), "text hi".to_string()]);
}

#[tokio::test]
async fn late_joiner_receives_current_picture_immediately() {
    let (addr, _calls) = spawn_host().await;

    // First viewer warms the session up.
    let mut first = ViewerChannel::connect(&addr.to_string()).await.unwrap();
    recv_until(&mut first, |m| matches!(m, HostMessage::ScreenFrame { .. }))
        .await
        .expect("no frame for first viewer");

    // The second viewer's very first frame is the replayed last frame
    // (or a fresher live one) — it never has to wait for status first.
    let mut second = ViewerChannel::connect(&addr.to_string()).await.unwrap();
    let message = tokio::time::timeout(Duration::from_secs(5), second.recv())
        .await
        .expect("timed out")
        .expect("disconnected");
    assert!(
        matches!(message, HostMessage::ScreenFrame { .. }),
        "expected an immediate frame, got {message:?}"
    );
}
