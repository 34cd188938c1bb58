//! The capture loop: tick → grab → encode → emit.
//!
//! Runs on a recurring timer independent of any viewer connection. A
//! single-flight guard is the primary backpressure mechanism: if the
//! previous tick's grab+encode has not finished, the tick is skipped
//! entirely — frame-rate consistency is traded for bounded memory and
//! CPU, and in-flight encodes are never queued.
//!
//! ```text
//! timer tick ──guard──► grab ──► spawn_blocking(encode) ──► CaptureEvent::Frame
//!     │  (in flight? skip)                                       │
//!     └──────────────── release guard ◄──────────────────────────┘
//! ```

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace, warn};

use crate::capture::encoder::FrameEncoder;
use crate::capture::grabber::{CaptureInfo, ScreenGrabber};
use crate::error::CastError;
use crate::frame::{CaptureSettings, Frame, SettingsUpdate};

/// Degradation floor when per-tick failures drive the rate down.
const DEGRADED_MIN_FPS: u32 = 30;
/// Frame-rate step applied per degradation.
const DEGRADE_STEP_FPS: u32 = 10;

// ── CaptureEvent ─────────────────────────────────────────────────

/// Output of the capture loop.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A newly encoded frame.
    Frame(Arc<Frame>),
    /// Capture died mid-run (permission revoked). The loop has
    /// already stopped itself when this is emitted.
    Fatal(CastError),
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Fixed-period screen capture pipeline.
///
/// At most one instance may be running per host process; [`start`]
/// enforces this. Frames are emitted through the event channel given
/// at construction; the channel is bounded and `try_send` is used, so
/// a stalled consumer loses frames instead of stalling capture.
///
/// Degradation policy: a transient grab/encode failure steps the
/// target frame rate down by 10 fps (never below 30) on the theory
/// that failures under load are resource exhaustion. The rate does not
/// recover automatically; a settings update can raise it again.
///
/// [`start`]: CaptureLoop::start
pub struct CaptureLoop<G: ScreenGrabber> {
    grabber: Arc<G>,
    events: mpsc::Sender<CaptureEvent>,
    settings: Arc<Mutex<CaptureSettings>>,
    running: Arc<AtomicBool>,
    /// Single-flight guard: `true` while a grab+encode is in flight.
    inflight: Arc<AtomicBool>,
    /// Bumped on every stop; in-flight work from an older epoch must
    /// not deliver its frame.
    epoch: Arc<AtomicU64>,
    sequence: Arc<AtomicU64>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
}

impl<G: ScreenGrabber> CaptureLoop<G> {
    /// Create an idle loop emitting into `events`.
    pub fn new(grabber: Arc<G>, events: mpsc::Sender<CaptureEvent>) -> Self {
        Self {
            grabber,
            events,
            settings: Arc::new(Mutex::new(CaptureSettings::default())),
            running: Arc::new(AtomicBool::new(false)),
            inflight: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            sequence: Arc::new(AtomicU64::new(0)),
            timer_task: Mutex::new(None),
        }
    }

    /// Start capturing with the given settings.
    ///
    /// Probes the grabber once before arming the timer: if that first
    /// attempt fails, no timer is armed and the error is returned —
    /// permission-class failures must be surfaced to viewers and never
    /// retried automatically.
    pub async fn start(&self, settings: CaptureSettings) -> Result<CaptureInfo, CastError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CastError::Other("capture loop already running".into()));
        }
        *self.settings.lock().unwrap() = settings;

        // Permission probe. Any failure here fails start.
        if let Err(e) = self.grabber.grab(settings.screen_index).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        let screen = match self.grabber.screen_size(settings.screen_index).await {
            Ok(size) => size,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let epoch = self.epoch.load(Ordering::SeqCst);
        let task = tokio::spawn(Self::run_timer(
            Arc::clone(&self.grabber),
            self.events.clone(),
            Arc::clone(&self.settings),
            Arc::clone(&self.running),
            Arc::clone(&self.inflight),
            Arc::clone(&self.epoch),
            Arc::clone(&self.sequence),
            epoch,
        ));
        *self.timer_task.lock().unwrap() = Some(task);

        debug!(
            fps = settings.target_fps,
            quality = settings.jpeg_quality,
            scale = settings.downsample,
            screen = settings.screen_index,
            "capture loop started"
        );
        Ok(CaptureInfo { screen })
    }

    /// Stop capturing. Idempotent.
    ///
    /// Cancels the timer, bumps the delivery epoch (so a late-finishing
    /// encode is discarded rather than delivered after stop) and
    /// releases the single-flight guard.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inflight.store(false, Ordering::SeqCst);
        if let Some(task) = self.timer_task.lock().unwrap().take() {
            task.abort();
        }
        debug!("capture loop stopped");
    }

    /// Whether the timer is currently armed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> CaptureSettings {
        *self.settings.lock().unwrap()
    }

    /// Apply a partial settings update. Invalid fields are ignored.
    /// A frame-rate change restarts the timer on its next tick;
    /// quality/scale/screen changes apply on the next tick as-is.
    pub fn update_settings(&self, update: &SettingsUpdate) {
        let mut settings = self.settings.lock().unwrap();
        let rate_changed = settings.apply(update);
        if rate_changed {
            debug!(fps = settings.target_fps, "frame rate changed; timer will restart");
        }
    }

    // ── Timer task ───────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_timer(
        grabber: Arc<G>,
        events: mpsc::Sender<CaptureEvent>,
        settings: Arc<Mutex<CaptureSettings>>,
        running: Arc<AtomicBool>,
        inflight: Arc<AtomicBool>,
        epoch: Arc<AtomicU64>,
        sequence: Arc<AtomicU64>,
        start_epoch: u64,
    ) {
        let period = settings.lock().unwrap().frame_interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if !running.load(Ordering::SeqCst) || epoch.load(Ordering::SeqCst) != start_epoch {
                break;
            }

            // A frame-rate change restarts the timer.
            let current = settings.lock().unwrap().frame_interval();
            if current != interval.period() {
                interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + current, current);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                continue;
            }

            // Single-flight guard: never two grab+encodes concurrently.
            if inflight.swap(true, Ordering::SeqCst) {
                trace!("encode still in flight; skipping tick");
                continue;
            }

            let (screen_index, quality, downsample) = {
                let s = settings.lock().unwrap();
                (s.screen_index, s.jpeg_quality, s.downsample)
            };
            let grabber = Arc::clone(&grabber);
            let events = events.clone();
            let settings = Arc::clone(&settings);
            let running = Arc::clone(&running);
            let inflight = Arc::clone(&inflight);
            let epoch = Arc::clone(&epoch);
            let sequence = Arc::clone(&sequence);

            tokio::spawn(async move {
                let outcome =
                    Self::capture_once(&*grabber, screen_index, quality, downsample).await;
                match outcome {
                    Ok(frame) => {
                        // A stop() between tick and completion must not
                        // leak this frame to consumers.
                        if running.load(Ordering::SeqCst)
                            && epoch.load(Ordering::SeqCst) == start_epoch
                        {
                            let seq = sequence.fetch_add(1, Ordering::SeqCst) + 1;
                            let frame = Arc::new(Frame {
                                sequence: seq,
                                ..frame
                            });
                            if events.try_send(CaptureEvent::Frame(frame)).is_err() {
                                trace!("event channel full; dropping frame");
                            }
                        }
                    }
                    Err(e) if e.is_permission() => {
                        error!("capture permission lost mid-run: {e}");
                        running.store(false, Ordering::SeqCst);
                        let _ = events.try_send(CaptureEvent::Fatal(e));
                    }
                    Err(e) => {
                        warn!("capture tick failed, skipping frame: {e}");
                        Self::degrade(&settings);
                    }
                }
                inflight.store(false, Ordering::SeqCst);
            });
        }
    }

    /// One grab + encode. The encode runs on the blocking pool.
    async fn capture_once(
        grabber: &G,
        screen_index: usize,
        quality: u8,
        downsample: f32,
    ) -> Result<Frame, CastError> {
        let raw = grabber.grab(screen_index).await?;
        let encoded = tokio::task::spawn_blocking(move || {
            FrameEncoder::encode(&raw, quality, downsample)
        })
        .await
        .map_err(|e| CastError::Capture(format!("encode task failed: {e}")))??;

        Ok(Frame {
            payload: Bytes::from(encoded.jpeg),
            width: encoded.width,
            height: encoded.height,
            sequence: 0, // stamped by the caller
        })
    }

    /// Step the frame rate down after a transient failure.
    fn degrade(settings: &Mutex<CaptureSettings>) {
        let mut s = settings.lock().unwrap();
        if s.target_fps > DEGRADED_MIN_FPS {
            s.target_fps = s.target_fps.saturating_sub(DEGRADE_STEP_FPS).max(DEGRADED_MIN_FPS);
            warn!(fps = s.target_fps, "reduced frame rate after capture failures");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::grabber::RawImage;
    use crate::frame::ScreenSize;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Grabber whose grabs take a fixed (virtual) duration.
    struct SlowGrabber {
        delay: Duration,
        grabs: AtomicU64,
    }

    #[async_trait]
    impl ScreenGrabber for SlowGrabber {
        async fn grab(&self, _screen: usize) -> Result<RawImage, CastError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(RawImage::packed(2, 2, vec![0u8; 16]))
        }

        async fn screen_size(&self, _screen: usize) -> Result<ScreenSize, CastError> {
            Ok(ScreenSize::new(2, 2))
        }
    }

    /// Grabber that always denies permission.
    struct DeniedGrabber;

    #[async_trait]
    impl ScreenGrabber for DeniedGrabber {
        async fn grab(&self, _screen: usize) -> Result<RawImage, CastError> {
            Err(CastError::PermissionDenied("screen recording denied".into()))
        }

        async fn screen_size(&self, _screen: usize) -> Result<ScreenSize, CastError> {
            Err(CastError::PermissionDenied("screen recording denied".into()))
        }
    }

    /// Grabber whose probe succeeds but every later grab fails.
    struct FlakyGrabber {
        grabs: AtomicU64,
    }

    #[async_trait]
    impl ScreenGrabber for FlakyGrabber {
        async fn grab(&self, _screen: usize) -> Result<RawImage, CastError> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(RawImage::packed(2, 2, vec![0u8; 16]))
            } else {
                Err(CastError::Capture("grab failed".into()))
            }
        }

        async fn screen_size(&self, _screen: usize) -> Result<ScreenSize, CastError> {
            Ok(ScreenSize::new(2, 2))
        }
    }

    fn settings(fps: u32) -> CaptureSettings {
        CaptureSettings {
            target_fps: fps,
            ..Default::default()
        }
    }

    async fn drain_frames(rx: &mut mpsc::Receiver<CaptureEvent>) -> usize {
        let mut frames = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, CaptureEvent::Frame(_)) {
                frames += 1;
            }
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn permission_failure_arms_no_timer() {
        let (tx, mut rx) = mpsc::channel(16);
        let cap = CaptureLoop::new(Arc::new(DeniedGrabber), tx);

        let err = cap.start(settings(30)).await.unwrap_err();
        assert!(err.is_permission());
        assert!(!cap.is_running());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain_frames(&mut rx).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_encode_never_overlaps() {
        // 10 ms ticks, 50 ms grabs: completed captures are bounded by
        // elapsed / grab-duration, not elapsed / tick-interval.
        let grabber = Arc::new(SlowGrabber {
            delay: Duration::from_millis(50),
            grabs: AtomicU64::new(0),
        });
        let (tx, mut rx) = mpsc::channel(256);
        let cap = CaptureLoop::new(Arc::clone(&grabber), tx);
        cap.start(settings(100)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        cap.stop();

        let frames = drain_frames(&mut rx).await;
        assert!(
            (8..=11).contains(&frames),
            "expected ~500/50 frames, got {frames}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sequences_strictly_increase() {
        let grabber = Arc::new(SlowGrabber {
            delay: Duration::from_millis(1),
            grabs: AtomicU64::new(0),
        });
        let (tx, mut rx) = mpsc::channel(256);
        let cap = CaptureLoop::new(grabber, tx);
        cap.start(settings(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        cap.stop();

        let mut last = 0;
        while let Ok(event) = rx.try_recv() {
            if let CaptureEvent::Frame(frame) = event {
                assert!(frame.sequence > last);
                last = frame.sequence;
            }
        }
        assert!(last > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_delivery_after_stop() {
        let grabber = Arc::new(SlowGrabber {
            delay: Duration::from_millis(100),
            grabs: AtomicU64::new(0),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let cap = CaptureLoop::new(grabber, tx);
        cap.start(settings(30)).await.unwrap();

        // Let a grab get in flight, then stop before it completes.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cap.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(drain_frames(&mut rx).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_restartable() {
        let grabber = Arc::new(SlowGrabber {
            delay: Duration::from_millis(1),
            grabs: AtomicU64::new(0),
        });
        let (tx, _rx) = mpsc::channel(256);
        let cap = CaptureLoop::new(grabber, tx);

        cap.start(settings(30)).await.unwrap();
        cap.stop();
        cap.stop();
        assert!(!cap.is_running());

        cap.start(settings(30)).await.unwrap();
        assert!(cap.is_running());
        cap.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_rejected_while_running() {
        let grabber = Arc::new(SlowGrabber {
            delay: Duration::from_millis(1),
            grabs: AtomicU64::new(0),
        });
        let (tx, _rx) = mpsc::channel(256);
        let cap = CaptureLoop::new(grabber, tx);

        cap.start(settings(30)).await.unwrap();
        assert!(cap.start(settings(30)).await.is_err());
        cap.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_degrade_frame_rate() {
        let grabber = Arc::new(FlakyGrabber {
            grabs: AtomicU64::new(0),
        });
        let (tx, _rx) = mpsc::channel(256);
        let cap = CaptureLoop::new(grabber, tx);
        cap.start(settings(60)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        cap.stop();

        // 60 → 50 → 40 → 30, then the floor holds.
        assert_eq!(cap.settings().target_fps, DEGRADED_MIN_FPS);
    }
}
