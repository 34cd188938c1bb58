//! `cpal`-backed audio sink for the jitter buffer.
//!
//! The playback clock is the number of frames the output stream has
//! consumed. Scheduled chunks are mixed into the device callback at
//! their scheduled frame positions; a chunk whose stop flag is set is
//! silenced immediately, mid-chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use castlink_core::jitter::{AudioSink, PlaybackHandle, adapt_channels};
use castlink_core::{AudioChunk, CastError};

// ── Mixer state (pure, testable) ─────────────────────────────────

/// One chunk placed on the playback timeline.
pub struct Scheduled {
    /// First device frame this chunk occupies.
    pub start_frame: u64,
    /// Device-channel interleaved samples.
    pub samples: Vec<i16>,
    pub stopped: Arc<AtomicBool>,
    pub done: Arc<AtomicBool>,
}

/// Everything the device callback touches.
#[derive(Default)]
pub struct MixerState {
    /// Frames consumed by the device so far — the playback clock.
    pub position: u64,
    pub scheduled: Vec<Scheduled>,
}

/// Mix all live chunks overlapping the next `out.len() / channels`
/// frames into `out`, advance the clock, and retire finished chunks.
pub fn mix_into(state: &mut MixerState, out: &mut [f32], channels: u16) {
    let channels = channels.max(1) as usize;
    let frames = (out.len() / channels) as u64;
    out.fill(0.0);
    let position = state.position;

    for chunk in &mut state.scheduled {
        if chunk.stopped.load(Ordering::SeqCst) {
            chunk.done.store(true, Ordering::SeqCst);
            continue;
        }
        let chunk_frames = (chunk.samples.len() / channels) as u64;
        let chunk_end = chunk.start_frame + chunk_frames;

        let begin = position.max(chunk.start_frame);
        let end = (position + frames).min(chunk_end);
        for frame in begin..end {
            let out_base = ((frame - position) as usize) * channels;
            let src_base = ((frame - chunk.start_frame) as usize) * channels;
            for ch in 0..channels {
                out[out_base + ch] += chunk.samples[src_base + ch] as f32 / 32768.0;
            }
        }
        if position + frames >= chunk_end {
            chunk.done.store(true, Ordering::SeqCst);
        }
    }
    state.scheduled.retain(|c| !c.done.load(Ordering::SeqCst));

    for sample in out.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
    state.position += frames;
}

/// Nearest-frame resampling for chunks whose rate differs from the
/// device. Per-channel sample order is preserved.
pub fn resample(samples: &[i16], channels: u16, from: u32, to: u32) -> Vec<i16> {
    if from == to || from == 0 || to == 0 || channels == 0 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    let frames_in = samples.len() / channels;
    let frames_out = (frames_in as u64 * to as u64 / from as u64) as usize;
    let mut out = Vec::with_capacity(frames_out * channels);
    for i in 0..frames_out {
        let src = (i as u64 * from as u64 / to as u64) as usize;
        let base = src.min(frames_in.saturating_sub(1)) * channels;
        out.extend_from_slice(&samples[base..base + channels]);
    }
    out
}

// ── CpalSink ─────────────────────────────────────────────────────

/// Handle to one scheduled chunk.
pub struct CpalHandle {
    stopped: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl PlaybackHandle for CpalHandle {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.done.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst)
    }
}

/// Output stream + shared mixer state.
pub struct CpalSink {
    state: Arc<Mutex<MixerState>>,
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

impl CpalSink {
    /// Open the default output device.
    pub fn new() -> Result<Self, CastError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| CastError::Audio("no default output device".into()))?;
        let default = device
            .default_output_config()
            .map_err(|e| CastError::Audio(e.to_string()))?;
        let sample_rate = default.sample_rate().0;
        let channels = default.channels();
        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate,
            channels,
            "opening audio output"
        );

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let state = Arc::new(Mutex::new(MixerState::default()));
        let callback_state = Arc::clone(&state);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut state = callback_state.lock().unwrap();
                    mix_into(&mut state, data, channels);
                },
                |e| warn!("audio output stream error: {e}"),
                None,
            )
            .map_err(|e| CastError::Audio(e.to_string()))?;
        stream
            .play()
            .map_err(|e| CastError::Audio(e.to_string()))?;

        Ok(Self {
            state,
            _stream: stream,
            sample_rate,
            channels,
        })
    }
}

impl AudioSink for CpalSink {
    type Handle = CpalHandle;

    fn now(&self) -> Duration {
        let position = self.state.lock().unwrap().position;
        Duration::from_secs_f64(position as f64 / self.sample_rate as f64)
    }

    fn schedule(&mut self, chunk: AudioChunk, at: Duration) -> Result<CpalHandle, CastError> {
        // Adapt to the device's layout; per-channel order preserved.
        let samples = adapt_channels(&chunk.samples, chunk.channels, self.channels);
        let samples = resample(&samples, self.channels, chunk.sample_rate, self.sample_rate);

        let start_frame = (at.as_secs_f64() * self.sample_rate as f64).round() as u64;
        let stopped = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        self.state.lock().unwrap().scheduled.push(Scheduled {
            start_frame,
            samples,
            stopped: Arc::clone(&stopped),
            done: Arc::clone(&done),
        });

        Ok(CpalHandle { stopped, done })
    }
}

// ── Tests ────────────────────────────────────────────────────────
