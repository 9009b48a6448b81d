//! Microphone capture using PipeWire
//!
//! Each opened stream runs its own PipeWire main loop on a background thread
//! and emits a streaming WAV: one header chunk once the format is known, then
//! one PCM chunk per process callback.

use super::codec::{header_chunk, pcm_chunk};
use super::{
    stream_ready, CaptureConstraints, CaptureService, CaptureStream, EncodedChunk, CONNECT_TIMEOUT,
};
use crate::error::CaptureError;
use anyhow::{anyhow, Context as _};
use log::{debug, error, info, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use pw::stream::StreamState;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Chunks produced by the capture thread, waiting to be taken
#[derive(Clone, Default)]
struct ChunkQueue {
    inner: Arc<Mutex<ChunkQueueInner>>,
}

#[derive(Default)]
struct ChunkQueueInner {
    pending: Vec<EncodedChunk>,
    header_written: bool,
}

impl ChunkQueue {
    fn push_samples(&self, samples: &[f32], sample_rate: u32) {
        if samples.is_empty() {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if !inner.header_written {
            match header_chunk(sample_rate) {
                Ok(header) => {
                    inner.pending.push(header);
                    inner.header_written = true;
                }
                Err(e) => {
                    error!("Failed to write WAV header: {}", e);
                    return;
                }
            }
        }
        inner.pending.push(pcm_chunk(samples));
    }

    fn take(&self) -> Vec<EncodedChunk> {
        self.inner
            .lock()
            .map(|mut inner| std::mem::take(&mut inner.pending))
            .unwrap_or_default()
    }
}

/// Average interleaved frames down to one channel
fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Map a stream state onto the result `open` reports
fn capture_ready(state: &StreamState) -> Option<Result<(), CaptureError>> {
    stream_ready(state).map(|result| result.map_err(|message| CaptureError::classify(&message)))
}

enum CaptureCommand {
    Stop,
}

/// Opens PipeWire capture streams
#[derive(Default)]
pub struct PipeWireCapture;

impl PipeWireCapture {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureService for PipeWireCapture {
    type Stream = PipeWireStream;

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<PipeWireStream, CaptureError> {
        let queue = ChunkQueue::default();
        let (sender, receiver) = pw::channel::channel::<CaptureCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);

        let constraints = *constraints;
        let thread_queue = queue.clone();
        let handle = thread::spawn(move || {
            let ready = ready_tx.clone();
            if let Err(e) = run_capture_loop(thread_queue, constraints, receiver, ready_tx) {
                let detail = format!("{:#}", e);
                error!("Capture loop failed: {}", detail);
                // Only the first result is read; later sends are harmless
                let _ = ready.try_send(Err(CaptureError::classify(&detail)));
            }
        });

        // Answered from state_changed once the stream is linked, or on failure
        match ready_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Capture stream connected ({:?})", constraints);
                Ok(PipeWireStream {
                    queue,
                    sender: Some(sender),
                    thread_handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = sender.send(CaptureCommand::Stop);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                // An input stream with nothing to link to never leaves Connecting
                warn!("Capture stream not linked within {:?}", CONNECT_TIMEOUT);
                let _ = sender.send(CaptureCommand::Stop);
                Err(CaptureError::NoDevice)
            }
        }
    }
}

/// A running PipeWire capture stream
pub struct PipeWireStream {
    queue: ChunkQueue,
    sender: Option<pw::channel::Sender<CaptureCommand>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PipeWireStream {
    fn shutdown(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(CaptureCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl CaptureStream for PipeWireStream {
    fn take_chunks(&mut self) -> Vec<EncodedChunk> {
        self.queue.take()
    }

    fn close(mut self) -> Vec<EncodedChunk> {
        self.shutdown();
        debug!("Capture stream closed");
        self.queue.take()
    }
}

impl Drop for PipeWireStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run the PipeWire capture loop in a background thread
fn run_capture_loop(
    queue: ChunkQueue,
    constraints: CaptureConstraints,
    receiver: pw::channel::Receiver<CaptureCommand>,
    ready: mpsc::SyncSender<Result<(), CaptureError>>,
) -> anyhow::Result<()> {
    pw::init();

    let mainloop =
        pw::main_loop::MainLoopRc::new(None).context("Failed to create PipeWire main loop")?;

    let context =
        pw::context::ContextRc::new(&mainloop, None).context("Failed to create PipeWire context")?;

    let core = context
        .connect_rc(None)
        .context("Failed to connect to PipeWire")?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        CaptureCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        queue: ChunkQueue,
    }

    let user_data = UserData {
        format: Default::default(),
        queue,
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => "ANC Demo",
    };

    let stream = pw::stream::StreamBox::new(&core, "anc-demo-capture", props)
        .context("Failed to create PipeWire stream")?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .state_changed(move |_, _, old, new| {
            debug!("Capture stream state: {:?} -> {:?}", old, new);
            if let StreamState::Error(message) = &new {
                error!("Capture stream error: {}", message);
            }
            if let Some(result) = capture_ready(&new) {
                // Only the first settled state is read
                let _ = ready.try_send(result);
            }
        })
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let Ok((media_type, media_subtype)) = format_utils::parse_format(param) else {
                return;
            };
            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                error!("Failed to parse capture format: {:?}", e);
                return;
            }
            info!(
                "Capture format: {} Hz, {} channel(s)",
                user_data.format.rate(),
                user_data.format.channels()
            );
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let sample_rate = user_data.format.rate();
            let size = data.chunk().size() as usize;

            if let Some(raw) = data.data() {
                let raw = &raw[..size.min(raw.len())];
                let interleaved: Vec<f32> = raw
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                let mono = mix_to_mono(&interleaved, n_channels);
                user_data.queue.push_samples(&mono, sample_rate);
            }
        })
        .register()
        .context("Failed to register stream listener")?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    if let Some(rate) = constraints.sample_rate {
        audio_info.set_rate(rate);
    }
    if let Some(channels) = constraints.channels {
        audio_info.set_channels(channels);
    }

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| anyhow!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner();

    let pod = Pod::from_bytes(&values).ok_or_else(|| anyhow!("Invalid audio format pod"))?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .context("Failed to connect stream (format not supported)")?;

    // Run until stopped
    mainloop.run();

    Ok(())
}
