//! Audio jitter buffer: bursty chunk arrivals → gap-free playback.
//!
//! Chunks arrive out of a push stream with arrival jitter; the buffer
//! queues them and schedules each to start exactly where the previous
//! one ends on the sink's monotonic playback clock. When the schedule
//! falls behind the clock (underrun), playback is re-anchored at
//! `now + lead` instead of trying to catch up by compressing audio.
//!
//! Scheduling is cooperative and clock-driven: every decision happens
//! on a chunk arrival or a short re-trigger delay reported back to the
//! driver — never a spin loop.
//!
//! ```text
//! push ──► queue ──► pump: [prebuffer guard] → [re-anchor] → [drain ≤3]
//!                        └─► Recheck(5ms) while chunks remain
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::CastError;
use crate::frame::AudioChunk;

// ── Tuning constants ─────────────────────────────────────────────

/// Minimum queued chunks before scheduling starts from a cold or
/// caught-up state (~32 ms at typical chunk size).
pub const MIN_BUFFERED_CHUNKS: usize = 2;
/// Lead applied when (re-)anchoring the schedule to the clock.
pub const SCHEDULE_LEAD: Duration = Duration::from_millis(30);
/// Chunks drained per pump invocation.
pub const SCHEDULE_BATCH: usize = 3;
/// Re-trigger delay while the queue still holds chunks.
pub const REFILL_DELAY: Duration = Duration::from_millis(5);
/// Headroom below which an empty queue counts as an underrun.
pub const MIN_HEADROOM: Duration = Duration::from_millis(20);
/// Re-trigger delay while waiting out the prebuffer guard.
pub const PREBUFFER_DELAY: Duration = Duration::from_millis(10);

// ── Sink contract ────────────────────────────────────────────────

/// A scheduled chunk that can be force-stopped before it finishes.
pub trait PlaybackHandle {
    /// Stop playback of this chunk immediately.
    fn stop(&mut self);

    /// Whether the chunk has finished (or been stopped).
    fn is_finished(&self) -> bool;
}

/// Contract the jitter buffer needs from an audio output.
pub trait AudioSink {
    type Handle: PlaybackHandle;

    /// Current value of the monotonic playback clock.
    fn now(&self) -> Duration;

    /// Schedule a chunk to start playing at clock time `at`.
    fn schedule(&mut self, chunk: AudioChunk, at: Duration) -> Result<Self::Handle, CastError>;
}

// ── JitterBuffer ─────────────────────────────────────────────────

/// What the driver should do after a `push`/`pump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Re-invoke [`JitterBuffer::pump`] after this delay.
    Recheck(Duration),
    /// Nothing pending; wait for the next chunk arrival.
    Idle,
}

/// Queue + scheduler converting chunk arrivals into back-to-back
/// playback against the sink's clock.
pub struct JitterBuffer<S: AudioSink> {
    sink: S,
    queue: VecDeque<AudioChunk>,
    /// Scheduled start of the next unscheduled chunk.
    /// `Duration::ZERO` means unanchored; the next drain re-anchors.
    next_play_time: Duration,
    enabled: bool,
    /// Handles of everything scheduled and not yet finished, so
    /// teardown and disable can force-stop them.
    handles: Vec<S::Handle>,
}

impl<S: AudioSink> JitterBuffer<S> {
    /// Create a buffer in the enabled state.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            queue: VecDeque::new(),
            next_play_time: Duration::ZERO,
            enabled: true,
            handles: Vec::new(),
        }
    }

    /// Accept one chunk and reevaluate the schedule.
    pub fn push(&mut self, chunk: AudioChunk) -> Pump {
        if !self.enabled {
            return Pump::Idle;
        }
        self.queue.push_back(chunk);
        self.pump()
    }

    /// Reevaluate the schedule. Called on every chunk arrival and on
    /// each re-trigger delay.
    pub fn pump(&mut self) -> Pump {
        if !self.enabled {
            return Pump::Idle;
        }
        self.handles.retain(|h| !h.is_finished());

        let now = self.sink.now();

        // Startup/underrun guard: with too little queued and the
        // schedule caught up to the clock, scheduling now would play
        // chunks back-to-back with no lead time. Wait briefly instead.
        if self.queue.len() < MIN_BUFFERED_CHUNKS && self.next_play_time <= now {
            if self.queue.is_empty() && self.next_play_time == Duration::ZERO {
                return Pump::Idle;
            }
            return Pump::Recheck(PREBUFFER_DELAY);
        }

        // Re-anchor on cold start or after an underrun rather than
        // scheduling in the past and compressing audio to catch up.
        if self.next_play_time <= now {
            trace!(
                behind_ms = (now - self.next_play_time).as_millis() as u64,
                "schedule fell behind clock; re-anchoring"
            );
            self.next_play_time = now + SCHEDULE_LEAD;
        }

        // Drain a bounded batch so one invocation never spikes.
        for _ in 0..SCHEDULE_BATCH {
            let Some(chunk) = self.queue.pop_front() else {
                break;
            };
            let duration = chunk.duration();
            match self.sink.schedule(chunk, self.next_play_time) {
                Ok(handle) => {
                    self.handles.push(handle);
                    self.next_play_time += duration;
                }
                Err(e) => {
                    warn!("audio schedule failed, dropping chunk: {e}");
                }
            }
        }

        if !self.queue.is_empty() {
            return Pump::Recheck(REFILL_DELAY);
        }

        // Queue drained: if the buffered headroom has shrunk below the
        // minimum lead, treat it as an underrun so the next arrival
        // re-anchors instead of gluing onto a nearly stale schedule.
        let headroom = self.next_play_time.saturating_sub(now);
        if headroom < MIN_HEADROOM {
            trace!(
                headroom_ms = headroom.as_millis() as u64,
                "headroom exhausted; next arrival re-anchors"
            );
            self.next_play_time = Duration::ZERO;
        }
        Pump::Idle
    }

    /// Enable or disable playback.
    ///
    /// Enabling resets all scheduling state; disabling force-stops
    /// every scheduled handle and discards the queue — no partial
    /// chunks play after disable.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.queue.clear();
            self.next_play_time = Duration::ZERO;
            debug!("audio playback enabled");
        } else {
            for handle in &mut self.handles {
                handle.stop();
            }
            self.handles.clear();
            self.queue.clear();
            self.next_play_time = Duration::ZERO;
            debug!("audio playback disabled; all scheduled chunks stopped");
        }
    }

    /// Force-stop everything scheduled. Used on teardown.
    pub fn shutdown(&mut self) {
        for handle in &mut self.handles {
            handle.stop();
        }
        self.handles.clear();
        self.queue.clear();
        self.next_play_time = Duration::ZERO;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Chunks queued and not yet scheduled.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

// ── Channel adaptation ───────────────────────────────────────────

/// Re-interleave samples for a device with a different channel count,
/// preserving per-channel sample order.
///
/// Mono→N duplicates the single channel; N→mono averages; otherwise
/// each output channel takes the corresponding input channel, wrapping
/// when the input has fewer channels.
pub fn adapt_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else {
            for ch in 0..to {
                out.push(frame[ch % from]);
            }
        }
    }
    out
}

// ── Driver ───────────────────────────────────────────────────────

/// Commands accepted by [`run_jitter`].
#[derive(Debug)]
pub enum JitterCommand {
    Chunk(AudioChunk),
    SetEnabled(bool),
}

/// Async driver: reevaluates the buffer on every arrival and on the
/// re-trigger delays it requests. Runs until the command channel
/// closes, then force-stops all scheduled playback.
pub async fn run_jitter<S: AudioSink>(
    mut buffer: JitterBuffer<S>,
    mut commands: mpsc::Receiver<JitterCommand>,
) {
    let mut recheck_at: Option<tokio::time::Instant> = None;

    loop {
        let action = match recheck_at {
            Some(deadline) => tokio::select! {
                command = commands.recv() => match command {
                    Some(JitterCommand::Chunk(chunk)) => buffer.push(chunk),
                    Some(JitterCommand::SetEnabled(on)) => {
                        buffer.set_enabled(on);
                        buffer.pump()
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => buffer.pump(),
            },
            None => match commands.recv().await {
                Some(JitterCommand::Chunk(chunk)) => buffer.push(chunk),
                Some(JitterCommand::SetEnabled(on)) => {
                    buffer.set_enabled(on);
                    buffer.pump()
                }
                None => break,
            },
        };

        recheck_at = match action {
            Pump::Recheck(delay) => Some(tokio::time::Instant::now() + delay),
            Pump::Idle => None,
        };
    }

    buffer.shutdown();
}

// ── Tests ────────────────────────────────────────────────────────
