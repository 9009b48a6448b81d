//! Audio capture, decoding and playback
//!
//! This module provides:
//! - The capability contracts the controller drives (capture, decode, playback graph)
//! - Microphone capture and playback using PipeWire
//! - A streaming WAV codec via hound
//! - An analyser tap producing time-domain and frequency snapshots

mod analyser;
mod capture;
mod codec;
mod playback;

use crate::error::{CaptureError, DecodeError, PlaybackError};
use pipewire::stream::StreamState;
use std::sync::Arc;
use std::time::Duration;

pub use analyser::Analyser;
pub use capture::{PipeWireCapture, PipeWireStream};
pub use codec::WavDecoder;
pub use playback::{PipeWireGraph, PipeWirePlayback};

#[cfg(test)]
pub use codec::{header_chunk, pcm_chunk};

/// Shape requested when opening a capture stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Requested sample rate; `None` accepts the device rate
    pub sample_rate: Option<u32>,
    /// Requested channel count; `None` accepts the device layout
    pub channels: Option<u32>,
}

impl CaptureConstraints {
    /// Accept whatever the device offers
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Explicit shape tried when the permissive request fails
    pub fn fallback() -> Self {
        Self {
            sample_rate: Some(48000),
            channels: Some(1),
        }
    }
}

/// One piece of the encoded recording, in emission order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedChunk(pub Vec<u8>);

impl EncodedChunk {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Concatenate a chunk sequence into one encoded recording
pub fn concat_chunks(chunks: &[EncodedChunk]) -> Vec<u8> {
    let total = chunks.iter().map(EncodedChunk::len).sum();
    let mut bytes = Vec::with_capacity(total);
    for chunk in chunks {
        bytes.extend_from_slice(&chunk.0);
    }
    bytes
}

/// Source of microphone streams
pub trait CaptureService {
    type Stream: CaptureStream;

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<Self::Stream, CaptureError>;
}

/// A live microphone stream emitting encoded chunks
pub trait CaptureStream {
    /// Chunks emitted since the last call
    fn take_chunks(&mut self) -> Vec<EncodedChunk>;

    /// Halt capture and release the device.
    ///
    /// Returns once the stream has fully stopped, with any chunks not yet taken.
    fn close(self) -> Vec<EncodedChunk>;
}

/// Turns an encoded recording into samples
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, bytes: &[u8]) -> Result<SampleBuffer, DecodeError>;
}

/// Which analysis the snapshot carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotKind {
    /// `fft_size` bytes centred on 128
    TimeDomain,
    /// `fft_size / 2` magnitude bytes
    Frequency,
}

/// Builds playback graphs for a buffer
pub trait PlaybackGraph {
    type Handle: PlaybackHandle;

    /// source -> gain -> analyser -> output, not yet started
    fn create(
        &mut self,
        buffer: Arc<SampleBuffer>,
        fft_size: usize,
    ) -> Result<Self::Handle, PlaybackError>;
}

/// A live playback graph
pub trait PlaybackHandle {
    /// Rewrite the gain parameter; applies to the running graph
    fn set_gain(&mut self, gain: f32);
    fn gain(&self) -> f32;
    fn start(&mut self) -> Result<(), PlaybackError>;
    /// Stop output. Does not fire the ended callback.
    fn stop(&mut self);
    /// Called once when the clip plays to its end
    fn on_ended(&mut self, callback: Box<dyn FnOnce() + Send + 'static>);
    fn snapshot(&self, kind: SnapshotKind) -> Vec<u8>;
}

/// Decoded, immutable audio
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    sample_rate: u32,
    /// Planar channel data, all channels the same length
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        let channels = channels
            .into_iter()
            .map(|mut c| {
                c.truncate(frames);
                c
            })
            .collect();
        Self {
            sample_rate,
            channels,
        }
    }

    /// Build from interleaved samples
    pub fn from_interleaved(sample_rate: u32, channel_count: usize, samples: &[f32]) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (c, &s) in frame.iter().enumerate() {
                channels[c].push(s);
            }
        }
        Self::new(sample_rate, channels)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Average of all channels at `frame`
    pub fn mono_at(&self, frame: usize) -> f32 {
        if self.channels.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .channels
            .iter()
            .map(|c| c.get(frame).copied().unwrap_or(0.0))
            .sum();
        sum / self.channels.len() as f32
    }
}

/// How long a backend waits for its PipeWire stream to come up
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Whether a stream state settles the connect handshake.
///
/// `Paused` counts as up: the stream is linked and its format negotiated.
/// `None` means keep waiting.
pub(crate) fn stream_ready(state: &StreamState) -> Option<Result<(), String>> {
    match state {
        StreamState::Streaming | StreamState::Paused => Some(Ok(())),
        StreamState::Error(message) => Some(Err(message.clone())),
        _ => None,
    }
}
