//! Audio playback using PipeWire
//!
//! Plays a decoded buffer through a gain stage and an analyser tap. The gain
//! lives in an atomic so it can be rewritten while the stream is running.

use super::{
    stream_ready, Analyser, PlaybackGraph, PlaybackHandle, SampleBuffer, SnapshotKind,
    CONNECT_TIMEOUT,
};
use crate::error::PlaybackError;
use anyhow::{anyhow, Context as _};
use log::{debug, error, info};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use pw::stream::StreamState;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Connect result handed from the playback thread to `start`
type ReadySender = SyncSender<Result<(), String>>;

/// State shared between the handle and the PipeWire thread
#[derive(Clone)]
struct SharedPlaybackState {
    buffer: Arc<SampleBuffer>,
    /// Next frame to play
    position: Arc<Mutex<usize>>,
    /// f32 bits of the gain parameter
    gain: Arc<AtomicU32>,
    analyser: Arc<Mutex<Analyser>>,
}

impl SharedPlaybackState {
    fn new(buffer: Arc<SampleBuffer>, fft_size: usize) -> Self {
        Self {
            buffer,
            position: Arc::new(Mutex::new(0)),
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            analyser: Arc::new(Mutex::new(Analyser::new(fft_size))),
        }
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::SeqCst))
    }

    fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::SeqCst);
    }

    /// Render up to `frames` interleaved output frames.
    ///
    /// Returns `None` once the buffer is exhausted.
    fn render(&self, frames: usize, out_channels: usize) -> Option<Vec<f32>> {
        let mut position = self.position.lock().ok()?;
        let total = self.buffer.frames();
        if *position >= total {
            return None;
        }

        let end = (*position + frames).min(total);
        let gain = self.gain();
        let out_channels = out_channels.max(1);

        let mut interleaved = Vec::with_capacity((end - *position) * out_channels);
        let mut mono = Vec::with_capacity(end - *position);
        for frame in *position..end {
            for c in 0..out_channels {
                let source = self
                    .buffer
                    .channel(c)
                    .or_else(|| self.buffer.channel(0))
                    .and_then(|ch| ch.get(frame).copied())
                    .unwrap_or(0.0);
                interleaved.push(source * gain);
            }
            mono.push(self.buffer.mono_at(frame) * gain);
        }
        *position = end;
        drop(position);

        if let Ok(mut analyser) = self.analyser.lock() {
            analyser.push(&mono);
        }

        Some(interleaved)
    }
}

enum PlaybackCommand {
    Stop,
}

/// Epilogue of the playback thread.
///
/// A failed loop reports its error to `start` and never counts as the end of
/// the clip. A clean exit fires the ended callback unless `stop` was called.
fn finish_playback(
    result: anyhow::Result<()>,
    stopped: &AtomicBool,
    on_ended: &Mutex<Option<EndedCallback>>,
    ready: &ReadySender,
) {
    if let Err(e) = result {
        let detail = format!("{:#}", e);
        error!("Playback error: {}", detail);
        let _ = ready.try_send(Err(detail));
        return;
    }
    if stopped.load(Ordering::SeqCst) {
        return;
    }
    let callback = on_ended.lock().ok().and_then(|mut cb| cb.take());
    if let Some(callback) = callback {
        debug!("Playback reached end of clip");
        callback();
    }
}

/// Builds PipeWire playback graphs
#[derive(Default)]
pub struct PipeWireGraph;

impl PipeWireGraph {
    pub fn new() -> Self {
        Self
    }
}

impl PlaybackGraph for PipeWireGraph {
    type Handle = PipeWirePlayback;

    fn create(
        &mut self,
        buffer: Arc<SampleBuffer>,
        fft_size: usize,
    ) -> Result<PipeWirePlayback, PlaybackError> {
        if buffer.frames() == 0 {
            return Err(PlaybackError::Backend("clip has no samples".to_string()));
        }
        Ok(PipeWirePlayback {
            state: SharedPlaybackState::new(buffer, fft_size),
            stopped: Arc::new(AtomicBool::new(false)),
            on_ended: Arc::new(Mutex::new(None)),
            thread_handle: None,
            sender: None,
        })
    }
}

/// A playing (or ready) PipeWire graph
pub struct PipeWirePlayback {
    state: SharedPlaybackState,
    /// Set when stopped explicitly, so the ended callback is skipped
    stopped: Arc<AtomicBool>,
    on_ended: Arc<Mutex<Option<EndedCallback>>>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PlaybackCommand>>,
}

impl PlaybackHandle for PipeWirePlayback {
    fn set_gain(&mut self, gain: f32) {
        self.state.set_gain(gain);
    }

    fn gain(&self) -> f32 {
        self.state.gain()
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        if self.thread_handle.is_some() {
            return Ok(());
        }

        let (sender, receiver) = pw::channel::channel::<PlaybackCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);
        self.sender = Some(sender);

        let state = self.state.clone();
        let stopped = self.stopped.clone();
        let on_ended = self.on_ended.clone();

        let handle = thread::Builder::new()
            .name("anc-demo-playback".to_string())
            .spawn(move || {
                let result = run_playback_loop(state, receiver, ready_tx.clone());
                finish_playback(result, &stopped, &on_ended, &ready_tx);
            })
            .map_err(|e| PlaybackError::Backend(e.to_string()))?;

        self.thread_handle = Some(handle);

        // Answered from state_changed once the stream is linked, or on failure
        let failure = match ready_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(())) => None,
            Ok(Err(detail)) => Some(detail),
            Err(_) => Some(format!(
                "output stream not linked within {:?}",
                CONNECT_TIMEOUT
            )),
        };
        if let Some(detail) = failure {
            self.stop();
            return Err(PlaybackError::Backend(detail));
        }

        info!(
            "Playback started ({:.1}s, gain {})",
            self.state.buffer.duration().as_secs_f32(),
            self.state.gain()
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);

        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PlaybackCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn on_ended(&mut self, callback: EndedCallback) {
        if let Ok(mut slot) = self.on_ended.lock() {
            *slot = Some(callback);
        }
    }

    fn snapshot(&self, kind: SnapshotKind) -> Vec<u8> {
        let Ok(mut analyser) = self.state.analyser.lock() else {
            return Vec::new();
        };
        match kind {
            SnapshotKind::TimeDomain => analyser.time_domain_bytes(),
            SnapshotKind::Frequency => analyser.frequency_bytes(),
        }
    }
}

impl Drop for PipeWirePlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the PipeWire playback loop in a background thread
fn run_playback_loop(
    state: SharedPlaybackState,
    receiver: pw::channel::Receiver<PlaybackCommand>,
    ready: ReadySender,
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
        PlaybackCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedPlaybackState,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let sample_rate = state.buffer.sample_rate();
    let user_data = UserData {
        format: Default::default(),
        state,
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => "ANC Demo",
    };

    let stream = pw::stream::StreamBox::new(&core, "anc-demo-playback", props)
        .context("Failed to create PipeWire stream")?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .state_changed(move |_, _, old, new| {
            debug!("Playback stream state: {:?} -> {:?}", old, new);
            if let StreamState::Error(message) = &new {
                error!("Playback stream error: {}", message);
            }
            if let Some(result) = stream_ready(&new) {
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
                error!("Failed to parse playback format: {:?}", e);
            }
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
            let stride = std::mem::size_of::<f32>() * n_channels;

            let Some(slice) = data.data() else {
                return;
            };
            let n_frames = slice.len() / stride;

            match user_data.state.render(n_frames, n_channels) {
                Some(samples) => {
                    let written = samples.len() * std::mem::size_of::<f32>();
                    for (i, sample) in samples.iter().enumerate() {
                        let offset = i * 4;
                        slice[offset..offset + 4].copy_from_slice(&sample.to_le_bytes());
                    }
                    // Fill remainder with silence
                    slice[written..].fill(0);

                    let chunk = data.chunk_mut();
                    *chunk.offset_mut() = 0;
                    *chunk.stride_mut() = stride as i32;
                    *chunk.size_mut() = written as u32;
                }
                None => {
                    if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                        mainloop.quit();
                    }
                }
            }
        })
        .register()
        .context("Failed to register stream listener")?;

    // Request F32LE at the clip's rate so no resampling is needed on our side
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(sample_rate);

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
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .context("Failed to connect stream")?;

    // Run until stopped or playback ends
    mainloop.run();

    Ok(())
}
