//! `scrap`-based screen grabber.
//!
//! `scrap::Capturer` is not `Send` on X11, so all capture work runs on
//! one dedicated worker thread; the async side talks to it through a
//! request channel with oneshot replies.
//!
//! Failure classification: failing to open the display or create the
//! capturer is treated as permission-class (capture denied or no
//! display available) and aborts capture start; a frame that is merely
//! not ready yet is retried briefly and then reported as a transient
//! capture error, which only skips that tick.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use scrap::{Capturer, Display};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use castlink_core::capture::{RawImage, ScreenGrabber};
use castlink_core::{CastError, ScreenSize};

/// How long one grab waits for the compositor to produce a frame.
const FRAME_DEADLINE: Duration = Duration::from_millis(500);
/// Poll spacing while the frame is not ready.
const FRAME_POLL: Duration = Duration::from_millis(5);

/// User-facing remediation text for permission failures, broadcast to
/// viewers inside `capture-error`.
pub const PERMISSION_REMEDIATION: &str = "Screen capture is unavailable. On macOS: open \
System Settings > Privacy & Security > Screen Recording, allow the castlink host, then \
restart it. On Linux: make sure a display server is running and DISPLAY is set.";

enum GrabRequest {
    Frame {
        screen: usize,
        reply: oneshot::Sender<Result<RawImage, CastError>>,
    },
    Size {
        screen: usize,
        reply: oneshot::Sender<Result<ScreenSize, CastError>>,
    },
}

/// Async handle to the capture worker thread.
pub struct ScrapGrabber {
    requests: mpsc::Sender<GrabRequest>,
}

impl ScrapGrabber {
    /// Spawn the worker thread.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(4);
        std::thread::Builder::new()
            .name("castlink-grab".into())
            .spawn(move || worker(rx))
            .expect("spawning the capture thread cannot fail");
        Self { requests: tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CastError>>) -> GrabRequest,
    ) -> Result<T, CastError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(build(reply_tx))
            .await
            .map_err(|_| CastError::Capture("capture thread is gone".into()))?;
        reply_rx
            .await
            .map_err(|_| CastError::Capture("capture thread dropped the request".into()))?
    }
}

#[async_trait]
impl ScreenGrabber for ScrapGrabber {
    async fn grab(&self, screen_index: usize) -> Result<RawImage, CastError> {
        self.request(|reply| GrabRequest::Frame {
            screen: screen_index,
            reply,
        })
        .await
    }

    async fn screen_size(&self, screen_index: usize) -> Result<ScreenSize, CastError> {
        self.request(|reply| GrabRequest::Size {
            screen: screen_index,
            reply,
        })
        .await
    }
}

// ── Worker thread ────────────────────────────────────────────────

struct OpenCapturer {
    screen: usize,
    capturer: Capturer,
    width: usize,
    height: usize,
}

fn worker(mut requests: mpsc::Receiver<GrabRequest>) {
    let mut open: Option<OpenCapturer> = None;

    while let Some(request) = requests.blocking_recv() {
        match request {
            GrabRequest::Frame { screen, reply } => {
                let _ = reply.send(grab_one(&mut open, screen));
            }
            GrabRequest::Size { screen, reply } => {
                let _ = reply.send(display_size(screen));
            }
        }
    }
    debug!("capture thread exiting");
}

fn open_display(screen: usize) -> Result<Display, CastError> {
    let mut displays = Display::all()
        .map_err(|e| CastError::PermissionDenied(format!("{e}. {PERMISSION_REMEDIATION}")))?;
    if screen >= displays.len() {
        return Err(CastError::Capture(format!(
            "screen index {screen} out of range ({} available)",
            displays.len()
        )));
    }
    Ok(displays.remove(screen))
}

fn display_size(screen: usize) -> Result<ScreenSize, CastError> {
    let display = open_display(screen)?;
    Ok(ScreenSize::new(display.width() as u32, display.height() as u32))
}

fn grab_one(open: &mut Option<OpenCapturer>, screen: usize) -> Result<RawImage, CastError> {
    // (Re-)open when the target screen changed or nothing is open.
    if open.as_ref().map(|o| o.screen) != Some(screen) {
        let display = open_display(screen)?;
        let width = display.width();
        let height = display.height();
        let capturer = Capturer::new(display).map_err(|e| {
            CastError::PermissionDenied(format!("{e}. {PERMISSION_REMEDIATION}"))
        })?;
        *open = Some(OpenCapturer {
            screen,
            capturer,
            width,
            height,
        });
    }
    let outcome = capture_frame(open.as_mut().expect("just opened"));
    match outcome {
        GrabOutcome::Frame(image) => Ok(image),
        GrabOutcome::Timeout => Err(CastError::Capture("no frame within deadline".into())),
        GrabOutcome::Broken(message) => {
            // Force a reopen on the next grab.
            warn!("capturer failed, will reopen: {message}");
            *open = None;
            Err(CastError::Capture(message))
        }
    }
}

enum GrabOutcome {
    Frame(RawImage),
    Timeout,
    Broken(String),
}

fn capture_frame(state: &mut OpenCapturer) -> GrabOutcome {
    let deadline = Instant::now() + FRAME_DEADLINE;
    loop {
        match state.capturer.frame() {
            Ok(frame) => {
                let stride = frame.len() / state.height;
                return GrabOutcome::Frame(RawImage {
                    width: state.width as u32,
                    height: state.height as u32,
                    stride,
                    data: frame.to_vec(),
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return GrabOutcome::Timeout;
                }
                std::thread::sleep(FRAME_POLL);
            }
            Err(e) => return GrabOutcome::Broken(e.to_string()),
        }
    }
}
