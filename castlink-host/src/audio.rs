//! System audio capture via `cpal`.
//!
//! Opens the default input device (the loopback/monitor device where
//! the OS exposes one), accumulates the callback's float samples into
//! fixed-duration PCM16 chunks and pushes them to the session for
//! fan-out as `audio-chunk` messages. The chunk channel is bounded; if
//! the session stalls, chunks are dropped here rather than queued
//! without limit.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated
//! worker thread — the same arrangement the screen grabber uses — and
//! the async side only ever sees the chunk channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use castlink_core::{AudioChunk, CastError};

use crate::config::AudioConfig;

/// Chunks buffered towards the session before new ones are dropped.
const CHUNK_BUFFER: usize = 32;

// ── Chunk accumulation (pure, testable) ──────────────────────────

/// Accumulates interleaved samples and emits fixed-size chunks.
pub struct ChunkAccumulator {
    buffer: Vec<i16>,
    samples_per_chunk: usize,
    sample_rate: u32,
    channels: u16,
}

impl ChunkAccumulator {
    pub fn new(sample_rate: u32, channels: u16, chunk_ms: u32) -> Self {
        let frames = (sample_rate as usize * chunk_ms as usize / 1000).max(1);
        Self {
            buffer: Vec::new(),
            samples_per_chunk: frames * channels as usize,
            sample_rate,
            channels,
        }
    }

    /// Feed float samples; returns every complete chunk they filled.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioChunk> {
        self.buffer.extend(samples.iter().map(|&s| f32_to_i16(s)));

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.samples_per_chunk {
            let rest = self.buffer.split_off(self.samples_per_chunk);
            let chunk_samples = std::mem::replace(&mut self.buffer, rest);
            chunks.push(AudioChunk {
                samples: chunk_samples,
                sample_rate: self.sample_rate,
                channels: self.channels,
            });
        }
        chunks
    }
}

/// Float sample in [-1, 1] → PCM16, saturating.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

// ── SystemAudioSource ────────────────────────────────────────────

/// Handle to the running system-audio capture thread.
pub struct SystemAudioSource {
    /// Dropping this releases the worker thread and its stream.
    shutdown: std::sync::mpsc::Sender<()>,
}

impl SystemAudioSource {
    /// Spawn the capture thread and start capturing.
    ///
    /// Device failures are audio errors: the host keeps streaming
    /// video without sound rather than failing startup.
    pub fn start(config: &AudioConfig) -> Result<(Self, mpsc::Receiver<AudioChunk>), CastError> {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();

        let config = config.clone();
        std::thread::Builder::new()
            .name("castlink-audio-in".into())
            .spawn(move || worker(config, chunk_tx, ready_tx, shutdown_rx))
            .map_err(|e| CastError::Audio(format!("audio thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| CastError::Audio("audio thread died during startup".into()))??;

        Ok((Self { shutdown: shutdown_tx }, chunk_rx))
    }

    /// Stop capturing and release the device.
    pub fn stop(self) {
        drop(self.shutdown);
    }
}

// ── Worker thread ────────────────────────────────────────────────

fn worker(
    config: AudioConfig,
    chunks: mpsc::Sender<AudioChunk>,
    ready: std::sync::mpsc::Sender<Result<(), CastError>>,
    shutdown: std::sync::mpsc::Receiver<()>,
) {
    let stream = match open_stream(&config, chunks) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CastError::Audio(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    // Park until the handle is dropped; the stream must outlive it.
    let _ = shutdown.recv();
    drop(stream);
    debug!("audio capture thread exiting");
}

fn open_stream(
    config: &AudioConfig,
    chunks: mpsc::Sender<AudioChunk>,
) -> Result<cpal::Stream, CastError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CastError::Audio("no default input device".into()))?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %device_name, "opening system audio capture");

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut accumulator =
        ChunkAccumulator::new(config.sample_rate, config.channels, config.chunk_ms);

    device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for chunk in accumulator.push(data) {
                    if chunks.try_send(chunk).is_err() {
                        trace!("audio chunk buffer full; dropping chunk");
                    }
                }
            },
            |e| warn!("audio input stream error: {e}"),
            None,
        )
        .map_err(|e| CastError::Audio(e.to_string()))
}

// ── Tests ────────────────────────────────────────────────────────
