//! Session context and frame fan-out.
//!
//! [`Session`] is the explicit owner of all shared session state —
//! viewer registry, last frame, capture state, remote-control flag —
//! so nothing lives in ambient globals and several independent
//! sessions per process remain possible.
//!
//! Delivery to each viewer is fire-and-forget through that viewer's
//! bounded outbound sender: a slow viewer fills its own buffer and
//! loses messages without back-pressuring capture or the other
//! viewers.
//!
//! Viewer-count transitions drive the capture lifecycle: 0→1 emits
//! [`CaptureControl::Start`]; 1→0 emits [`CaptureControl::Stop`] only
//! after a debounce window has elapsed with the count still at zero,
//! so rapid reconnects do not bounce the capture pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::frame::{CaptureSettings, CaptureState, Frame, RemoteControlState, ScreenSize};
use crate::message::{HostMessage, StatusSnapshot};

/// Delay before a 1→0 viewer transition actually stops capture.
pub const STOP_DEBOUNCE: Duration = Duration::from_secs(1);

/// Identifier for one registered viewer.
pub type ViewerId = u64;

/// Capture lifecycle commands emitted by viewer-count transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureControl {
    Start,
    Stop,
}

// ── Session ──────────────────────────────────────────────────────

/// Shared state for one host session.
pub struct Session {
    viewers: Mutex<HashMap<ViewerId, mpsc::Sender<HostMessage>>>,
    last_frame: Mutex<Option<Arc<Frame>>>,
    remote: Mutex<RemoteControlState>,
    capture_state: Mutex<CaptureState>,
    control_tx: mpsc::Sender<CaptureControl>,
    next_viewer_id: AtomicU64,
    /// Bumped whenever the pending debounced stop must be cancelled.
    debounce_epoch: AtomicU64,
    stop_debounce: Duration,
}

impl Session {
    /// Create a session and the receiver for its capture commands.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<CaptureControl>) {
        Self::with_debounce(STOP_DEBOUNCE)
    }

    /// Create a session with an explicit stop-debounce window.
    pub fn with_debounce(
        stop_debounce: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<CaptureControl>) {
        let (control_tx, control_rx) = mpsc::channel(8);
        let session = Arc::new(Self {
            viewers: Mutex::new(HashMap::new()),
            last_frame: Mutex::new(None),
            remote: Mutex::new(RemoteControlState::default()),
            capture_state: Mutex::new(CaptureState::Idle),
            control_tx,
            next_viewer_id: AtomicU64::new(0),
            debounce_epoch: AtomicU64::new(0),
            stop_debounce,
        });
        (session, control_rx)
    }

    // ── Viewer registry ──────────────────────────────────────────

    /// Register a viewer's outbound sender. A 0→1 transition requests
    /// capture start (once, even for simultaneous joins); any pending
    /// debounced stop is cancelled.
    pub fn register_viewer(&self, tx: mpsc::Sender<HostMessage>) -> ViewerId {
        let id = self.next_viewer_id.fetch_add(1, Ordering::SeqCst) + 1;
        let was_empty = {
            let mut viewers = self.viewers.lock().unwrap();
            let was_empty = viewers.is_empty();
            viewers.insert(id, tx);
            was_empty
        };

        // A joining viewer always cancels a pending stop.
        self.debounce_epoch.fetch_add(1, Ordering::SeqCst);

        if was_empty && *self.capture_state.lock().unwrap() == CaptureState::Idle {
            let _ = self.control_tx.try_send(CaptureControl::Start);
        }
        debug!(viewer = id, "viewer registered");
        id
    }

    /// Remove a viewer. A 1→0 transition schedules a debounced stop;
    /// the stop fires only if the count is still zero when the window
    /// elapses and no viewer joined in between.
    pub fn unregister_viewer(self: &Arc<Self>, id: ViewerId) {
        let now_empty = {
            let mut viewers = self.viewers.lock().unwrap();
            if viewers.remove(&id).is_none() {
                return;
            }
            viewers.is_empty()
        };
        debug!(viewer = id, "viewer unregistered");

        if !now_empty {
            return;
        }
        let epoch = self.debounce_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(session.stop_debounce).await;
            let still_current = session.debounce_epoch.load(Ordering::SeqCst) == epoch;
            if still_current && session.viewer_count() == 0 {
                let _ = session.control_tx.try_send(CaptureControl::Stop);
            }
        });
    }

    /// Number of connected viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().unwrap().len()
    }

    // ── Fan-out ──────────────────────────────────────────────────

    /// Send to every viewer, fire-and-forget. A viewer whose buffer is
    /// full loses this message; nobody else is affected.
    pub fn broadcast(&self, message: HostMessage) {
        let viewers = self.viewers.lock().unwrap();
        for (id, tx) in viewers.iter() {
            if tx.try_send(message.clone()).is_err() {
                trace!(viewer = id, "outbound buffer full or closed; dropping message");
            }
        }
    }

    /// Send to a single viewer (used for last-frame replay and status
    /// on join).
    pub fn send_to(&self, id: ViewerId, message: HostMessage) {
        let viewers = self.viewers.lock().unwrap();
        if let Some(tx) = viewers.get(&id) {
            if tx.try_send(message).is_err() {
                trace!(viewer = id, "outbound buffer full or closed; dropping message");
            }
        }
    }

    /// Retain the frame for late joiners and fan it out.
    pub fn publish_frame(&self, frame: Arc<Frame>) {
        let message = HostMessage::from_frame(&frame);
        *self.last_frame.lock().unwrap() = Some(frame);
        self.broadcast(message);
    }

    /// Most recent frame, for a newly joined viewer to receive the
    /// current picture instead of waiting for the next tick.
    pub fn last_frame(&self) -> Option<Arc<Frame>> {
        self.last_frame.lock().unwrap().clone()
    }

    // ── Capture state ────────────────────────────────────────────

    pub fn capture_state(&self) -> CaptureState {
        *self.capture_state.lock().unwrap()
    }

    pub fn set_capture_state(&self, state: CaptureState) {
        *self.capture_state.lock().unwrap() = state;
        if state == CaptureState::Idle {
            // Frames from the ended run must not be replayed to the
            // next run's viewers with stale sequence numbers.
            self.last_frame.lock().unwrap().take();
        }
    }

    // ── Remote control ───────────────────────────────────────────

    /// Enable remote control, refreshing the cached host screen size
    /// (displays can change between sessions). Broadcast to all.
    pub fn enable_remote_control(&self, host_screen: ScreenSize) {
        {
            let mut remote = self.remote.lock().unwrap();
            remote.enabled = true;
            remote.host_screen = host_screen;
        }
        self.broadcast(HostMessage::RemoteControlStatus { enabled: true });
    }

    /// Disable remote control and broadcast to all.
    pub fn disable_remote_control(&self) {
        self.remote.lock().unwrap().enabled = false;
        self.broadcast(HostMessage::RemoteControlStatus { enabled: false });
    }

    pub fn remote_control(&self) -> RemoteControlState {
        *self.remote.lock().unwrap()
    }

    /// Cache the host screen size without toggling remote control.
    pub fn set_host_screen(&self, size: ScreenSize) {
        self.remote.lock().unwrap().host_screen = size;
    }

    // ── Status queries (synchronous, side-effect free) ───────────

    /// Current capture configuration and counters.
    pub fn status_snapshot(&self, settings: &CaptureSettings) -> StatusSnapshot {
        let remote = *self.remote.lock().unwrap();
        StatusSnapshot {
            is_capturing: self.capture_state() == CaptureState::Capturing,
            connected_clients: self.viewer_count(),
            remote_control_enabled: remote.enabled,
            screen_size: remote.host_screen,
            frame_rate: settings.target_fps,
            quality: settings.jpeg_quality,
            scale: settings.downsample,
        }
    }

    /// Liveness: the capture controller is still listening.
    pub fn is_healthy(&self) -> bool {
        !self.control_tx.is_closed()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(sequence: u64) -> Arc<Frame> {
        Arc::new(Frame {
            payload: Bytes::from_static(&[0xFF, 0xD8]),
            width: 4,
            height: 4,
            sequence,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn capture_starts_once_for_simultaneous_joins() {
        let (session, mut control) = Session::new();
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);

        session.register_viewer(tx_a);
        session.register_viewer(tx_b);

        assert_eq!(control.try_recv().unwrap(), CaptureControl::Start);
        assert!(control.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_only_after_debounce_window() {
        let (session, mut control) = Session::with_debounce(Duration::from_millis(500));
        let (tx, _rx) = mpsc::channel(4);
        let id = session.register_viewer(tx);
        let _ = control.try_recv();
        session.set_capture_state(CaptureState::Capturing);

        session.unregister_viewer(id);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(control.try_recv().is_err(), "stop fired inside the window");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(control.try_recv().unwrap(), CaptureControl::Stop);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_window_cancels_stop() {
        let (session, mut control) = Session::with_debounce(Duration::from_millis(500));
        let (tx, _rx) = mpsc::channel(4);
        let id = session.register_viewer(tx);
        let _ = control.try_recv();
        session.set_capture_state(CaptureState::Capturing);

        session.unregister_viewer(id);
        tokio::time::sleep(Duration::from_millis(250)).await;

        let (tx2, _rx2) = mpsc::channel(4);
        session.register_viewer(tx2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        // Neither a stale stop nor a duplicate start.
        assert!(control.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_viewer_does_not_block_others() {
        let (session, _control) = Session::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(16);
        session.register_viewer(slow_tx);
        session.register_viewer(fast_tx);

        for seq in 1..=3 {
            session.publish_frame(frame(seq));
        }

        let mut fast_count = 0;
        while fast_rx.try_recv().is_ok() {
            fast_count += 1;
        }
        assert_eq!(fast_count, 3);

        // The slow viewer only kept what fit its buffer.
        let mut slow_count = 0;
        while slow_rx.try_recv().is_ok() {
            slow_count += 1;
        }
        assert_eq!(slow_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_frame_retained_for_late_joiners() {
        let (session, _control) = Session::new();
        assert!(session.last_frame().is_none());

        session.publish_frame(frame(1));
        session.publish_frame(frame(2));
        assert_eq!(session.last_frame().unwrap().sequence, 2);

        // Going idle clears the retained frame.
        session.set_capture_state(CaptureState::Idle);
        assert!(session.last_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_control_toggle_is_broadcast() {
        let (session, _control) = Session::new();
        let (tx, mut rx) = mpsc::channel(16);
        session.register_viewer(tx);

        session.enable_remote_control(ScreenSize::new(2560, 1440));
        session.disable_remote_control();

        assert_eq!(
            rx.try_recv().unwrap(),
            HostMessage::RemoteControlStatus { enabled: true }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            HostMessage::RemoteControlStatus { enabled: false }
        );

        let state = session.remote_control();
        assert!(!state.enabled);
        assert_eq!(state.host_screen, ScreenSize::new(2560, 1440));
    }

    #[tokio::test(start_paused = true)]
    async fn status_snapshot_reflects_state() {
        let (session, _control) = Session::new();
        let (tx, _rx) = mpsc::channel(4);
        session.register_viewer(tx);
        session.set_capture_state(CaptureState::Capturing);
        session.set_host_screen(ScreenSize::new(1920, 1080));

        let snapshot = session.status_snapshot(&CaptureSettings::default());
        assert!(snapshot.is_capturing);
        assert_eq!(snapshot.connected_clients, 1);
        assert_eq!(snapshot.screen_size, ScreenSize::new(1920, 1080));
        assert!(session.is_healthy());
    }
}
