//! Recording/playback controller
//!
//! Owns the session, the recorded clip and the active playback handle, and
//! drives the capture service, decoder and playback graph.
//!
//! Work that finishes later (decoding, the auto-stop timer, a clip playing to
//! its end) comes back as a [`ControllerEvent`] tagged with the generation it
//! was issued for. Events from an older recording or an older playback handle
//! are dropped, so a slow decode can never overwrite a newer clip and a
//! replaced handle can never stop the current one.

use crate::audio::{
    concat_chunks, CaptureConstraints, CaptureService, CaptureStream, Decoder, EncodedChunk,
    PlaybackGraph, PlaybackHandle, SampleBuffer, SnapshotKind,
};
use crate::error::{CaptureError, DecodeError, PlaybackError};
use crate::settings::Settings;
use crate::state::{Controls, RecordedClip, Session, SessionState, StatusBoard, VisualizationMode};
use crate::surface::DrawingSurface;
use crate::visualizer::VisualizationLoop;
use log::{debug, error, info, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Continuations delivered back to the controller
#[derive(Debug)]
pub enum ControllerEvent {
    Decoded {
        generation: u64,
        result: Result<SampleBuffer, DecodeError>,
    },
    AutoStop {
        generation: u64,
    },
    PlaybackEnded {
        playback: u64,
    },
}

/// Timer the host must schedule after a recording starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoStop {
    pub generation: u64,
    pub delay: Duration,
}

impl From<AutoStop> for ControllerEvent {
    fn from(auto_stop: AutoStop) -> Self {
        ControllerEvent::AutoStop {
            generation: auto_stop.generation,
        }
    }
}

/// Decode of one finished recording, to be run off the UI thread
pub struct DecodeJob<D> {
    generation: u64,
    bytes: Vec<u8>,
    decoder: Arc<D>,
}

impl<D: Decoder> DecodeJob<D> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn run(self) -> ControllerEvent {
        let result = self.decoder.decode(&self.bytes);
        ControllerEvent::Decoded {
            generation: self.generation,
            result,
        }
    }
}

pub struct Controller<C: CaptureService, D, G: PlaybackGraph> {
    session: Session,
    fft_size: usize,
    capture: C,
    decoder: Arc<D>,
    graph: G,
    stream: Option<C::Stream>,
    chunks: Vec<EncodedChunk>,
    clip: Option<RecordedClip>,
    playback: Option<G::Handle>,
    visualizer: VisualizationLoop,
    status: StatusBoard,
    recording_generation: u64,
    playback_generation: u64,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
}

impl<C, D, G> Controller<C, D, G>
where
    C: CaptureService,
    D: Decoder,
    G: PlaybackGraph,
{
    pub fn new(settings: &Settings, capture: C, decoder: D, graph: G) -> Self {
        let mut session = Session::new(settings.max_recording_time);
        session.anc_mode = settings.anc_on_start;
        session.visualization_mode = settings.visualization_mode;

        let mut status = StatusBoard::default();
        status.set_anc(session.anc_mode);

        let (events_tx, events_rx) = mpsc::channel();

        Self {
            session,
            fft_size: settings.fft_size,
            capture,
            decoder: Arc::new(decoder),
            graph,
            stream: None,
            chunks: Vec::new(),
            clip: None,
            playback: None,
            visualizer: VisualizationLoop::new(),
            status,
            recording_generation: 0,
            playback_generation: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn clip(&self) -> Option<&RecordedClip> {
        self.clip.as_ref()
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn controls(&self) -> Controls {
        Controls::derive(&self.session, self.clip.is_some())
    }

    /// Gain of the live graph, if playing
    pub fn playback_gain(&self) -> Option<f32> {
        self.playback.as_ref().map(|h| h.gain())
    }

    pub fn is_visualizing(&self) -> bool {
        self.visualizer.is_running()
    }

    /// Sender for continuations produced outside the controller
    pub fn event_sender(&self) -> Sender<ControllerEvent> {
        self.events_tx.clone()
    }

    /// Open the microphone and start accumulating chunks.
    ///
    /// Returns `Ok(None)` if a recording is already running.
    pub fn start_recording(&mut self, now: Instant) -> Result<Option<AutoStop>, CaptureError> {
        if self.session.is_recording() {
            debug!("start_recording ignored: already recording");
            return Ok(None);
        }

        let stream = match self.open_capture() {
            Ok(stream) => stream,
            Err(e) => {
                error!("Error accessing microphone: {:?}", e);
                self.status.set_status(e.to_string());
                return Err(e);
            }
        };

        self.teardown_playback();
        if self.clip.take().is_some() {
            debug!("Discarding previous clip");
        }

        self.stream = Some(stream);
        self.chunks.clear();
        self.recording_generation += 1;
        self.session.begin_recording(now);
        self.status.set_status("Recording...");
        self.status.set_duration(0.0);

        Ok(Some(AutoStop {
            generation: self.recording_generation,
            delay: self.session.max_recording_time(),
        }))
    }

    fn open_capture(&mut self) -> Result<C::Stream, CaptureError> {
        match self.capture.open(&CaptureConstraints::permissive()) {
            Ok(stream) => Ok(stream),
            Err(first) => {
                warn!(
                    "First capture attempt failed ({:?}), trying alternate constraints",
                    first
                );
                self.capture.open(&CaptureConstraints::fallback())
            }
        }
    }

    /// Stop capturing and hand back the decode to run.
    ///
    /// Returns `None` if not recording.
    pub fn stop_recording(&mut self) -> Option<DecodeJob<D>> {
        if !self.session.is_recording() {
            return None;
        }
        let stream = self.stream.take()?;

        // close() returns only after the stream has fully stopped
        self.chunks.extend(stream.close());
        let bytes = concat_chunks(&self.chunks);
        self.chunks.clear();

        info!(
            "Recording stopped after {:.1}s ({} bytes)",
            self.session.recording_duration().as_secs_f32(),
            bytes.len()
        );

        self.session.set_state(SessionState::Stopping);
        self.status.set_status("Processing recording...");

        Some(DecodeJob {
            generation: self.recording_generation,
            bytes,
            decoder: self.decoder.clone(),
        })
    }

    /// Collect emitted chunks and advance the duration display
    pub fn tick(&mut self, now: Instant) {
        if !self.session.is_recording() {
            return;
        }
        if let Some(stream) = self.stream.as_mut() {
            self.chunks.extend(stream.take_chunks());
        }
        self.session.update_duration(now);
        self.status
            .set_duration(self.session.recording_duration().as_secs_f32());
    }

    /// Play the clip from the beginning through a fresh graph
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.session.is_recording() {
            return Err(PlaybackError::Busy);
        }
        let Some(clip) = self.clip.as_ref() else {
            return Err(PlaybackError::NoClip);
        };
        let buffer = clip.buffer();

        self.teardown_playback();

        let mut handle = match self.graph.create(buffer, self.fft_size) {
            Ok(handle) => handle,
            Err(e) => return Err(self.playback_failed(e)),
        };
        handle.set_gain(self.session.gain());

        self.playback_generation += 1;
        let playback = self.playback_generation;
        let events = self.events_tx.clone();
        handle.on_ended(Box::new(move || {
            let _ = events.send(ControllerEvent::PlaybackEnded { playback });
        }));

        if let Err(e) = handle.start() {
            return Err(self.playback_failed(e));
        }

        self.playback = Some(handle);
        self.session.set_state(SessionState::Playing);
        self.status.set_status("Playing...");
        self.visualizer.start();
        Ok(())
    }

    fn playback_failed(&mut self, e: PlaybackError) -> PlaybackError {
        error!("Failed to start playback: {}", e);
        self.session.set_state(SessionState::IdleWithClip);
        self.status.set_status(e.to_string());
        e
    }

    /// Stop playback. It cannot resume mid-clip; `play` starts over.
    pub fn pause(&mut self) {
        if !self.session.is_playing() {
            return;
        }
        self.teardown_playback();
        self.session.set_state(SessionState::Paused);
        self.status.set_status("Paused");
    }

    fn teardown_playback(&mut self) {
        if let Some(mut handle) = self.playback.take() {
            handle.stop();
        }
        self.visualizer.stop();
        if self.session.is_playing() {
            self.session.set_state(SessionState::IdleWithClip);
        }
    }

    pub fn set_anc_mode(&mut self, enabled: bool) {
        self.session.anc_mode = enabled;
        self.status.set_anc(enabled);
        let gain = self.session.gain();
        if let Some(handle) = self.playback.as_mut() {
            handle.set_gain(gain);
            info!(
                "ANC {} during playback, gain now {}",
                if enabled { "on" } else { "off" },
                gain
            );
        }
    }

    pub fn set_visualization_mode(&mut self, mode: VisualizationMode) {
        self.session.visualization_mode = mode;
    }

    /// Apply a continuation, re-checking the session first
    pub fn dispatch(&mut self, event: ControllerEvent) -> Option<DecodeJob<D>> {
        match event {
            ControllerEvent::Decoded { generation, result } => {
                self.finish_decode(generation, result);
                None
            }
            ControllerEvent::AutoStop { generation } => {
                if generation != self.recording_generation || !self.session.is_recording() {
                    debug!("Auto-stop for recording {} ignored", generation);
                    return None;
                }
                info!(
                    "Maximum recording time ({:?}) reached",
                    self.session.max_recording_time()
                );
                self.stop_recording()
            }
            ControllerEvent::PlaybackEnded { playback } => {
                if playback != self.playback_generation || !self.session.is_playing() {
                    debug!("End of playback {} ignored", playback);
                    return None;
                }
                self.playback = None;
                self.visualizer.stop();
                self.session.set_state(SessionState::IdleWithClip);
                self.status.set_status("Playback complete");
                None
            }
        }
    }

    fn finish_decode(&mut self, generation: u64, result: Result<SampleBuffer, DecodeError>) {
        if generation != self.recording_generation
            || self.session.state() != SessionState::Stopping
        {
            debug!("Stale decode for recording {} dropped", generation);
            return;
        }

        match result {
            Ok(buffer) => {
                info!(
                    "Decoded {:.2}s clip ({} frames, {} channel(s) @ {} Hz)",
                    buffer.duration().as_secs_f32(),
                    buffer.frames(),
                    buffer.channel_count(),
                    buffer.sample_rate()
                );
                self.clip = Some(RecordedClip::new(buffer));
                self.session.set_state(SessionState::IdleWithClip);
                self.status.set_status("Recording complete");
            }
            Err(e) => {
                error!("Decode failed: {}", e);
                self.clip = None;
                self.session.set_state(SessionState::Idle);
                self.status.set_status(e.to_string());
            }
        }
    }

    /// Dispatch everything queued on the event channel
    pub fn poll_events(&mut self) -> Vec<DecodeJob<D>> {
        let mut jobs = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            jobs.extend(self.dispatch(event));
        }
        jobs
    }

    /// Draw one visualization frame if playback is live
    pub fn render_frame(&mut self, surface: &mut dyn DrawingSurface) -> bool {
        self.visualizer
            .frame(&self.session, self.playback.as_ref(), surface)
    }

    /// Resize the surface to its container
    pub fn sync_surface(&self, surface: &mut dyn DrawingSurface, width: f32, height: f32) -> bool {
        self.visualizer
            .sync_size(&self.session, surface, width, height)
    }

    /// Latest snapshot of the live graph
    pub fn snapshot(&self, kind: SnapshotKind) -> Option<Vec<u8>> {
        self.playback.as_ref().map(|h| h.snapshot(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{header_chunk, pcm_chunk, WavDecoder};
    use crate::surface::{DisplayList, DrawCommand};
    use crate::testing::{MockCapture, MockGraph};
    use crate::visualizer::{ALERT, CALM};

    const RATE: u32 = 1000;

    type TestController = Controller<MockCapture, WavDecoder, MockGraph>;

    fn controller() -> (TestController, MockCapture, MockGraph) {
        controller_with(MockCapture::default())
    }

    fn controller_with(capture: MockCapture) -> (TestController, MockCapture, MockGraph) {
        let graph = MockGraph::default();
        let controller =
            Controller::new(&Settings::default(), capture.clone(), WavDecoder, graph.clone());
        (controller, capture, graph)
    }

    fn emit_tone(capture: &MockCapture, secs: usize) {
        capture.emit(header_chunk(RATE).unwrap());
        for s in 0..secs {
            let block: Vec<f32> = (0..RATE as usize)
                .map(|i| ((s * RATE as usize + i) as f32 * 0.3).sin() * 0.5)
                .collect();
            capture.emit(pcm_chunk(&block));
        }
    }

    /// Record `secs` seconds of tone and decode it
    fn record_clip(controller: &mut TestController, capture: &MockCapture, secs: usize) {
        let start = Instant::now();
        controller.start_recording(start).unwrap().unwrap();
        emit_tone(capture, secs);
        controller.tick(start + Duration::from_secs(secs as u64));
        let job = controller.stop_recording().unwrap();
        controller.dispatch(job.run());
    }

    fn trace_colour(surface: &DisplayList) -> crate::surface::Color {
        surface
            .commands()
            .iter()
            .find_map(|c| match c {
                DrawCommand::Line { stroke, .. } if stroke.width == 2.0 => Some(stroke.color),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_record_stop_yields_clip() {
        let (mut controller, capture, _) = controller();
        let start = Instant::now();

        let auto = controller.start_recording(start).unwrap().unwrap();
        assert_eq!(auto.delay, Duration::from_secs(15));
        assert!(controller.session().is_recording());
        assert_eq!(controller.status().recording_status, "Recording...");
        let controls = controller.controls();
        assert!(!controls.record && controls.stop && !controls.play);

        emit_tone(&capture, 5);
        controller.tick(start + Duration::from_secs(5));
        assert_eq!(controller.status().recording_duration, "5.0s");

        let job = controller.stop_recording().unwrap();
        assert_eq!(controller.session().state(), SessionState::Stopping);
        assert_eq!(capture.log.borrow().closes, 1);
        assert!(!capture.log.borrow().live);

        controller.dispatch(job.run());
        assert_eq!(controller.session().state(), SessionState::IdleWithClip);
        assert_eq!(controller.status().recording_status, "Recording complete");
        let clip = controller.clip().unwrap();
        assert_eq!(clip.buffer().frames(), 5 * RATE as usize);
        assert!(controller.controls().play);
    }

    #[test]
    fn test_chunks_after_last_tick_are_kept() {
        let (mut controller, capture, _) = controller();
        controller.start_recording(Instant::now()).unwrap();
        capture.emit(header_chunk(RATE).unwrap());
        controller.tick(Instant::now());
        capture.emit(pcm_chunk(&[0.1; 10]));

        let job = controller.stop_recording().unwrap();
        controller.dispatch(job.run());
        assert_eq!(controller.clip().unwrap().buffer().frames(), 10);
    }

    #[test]
    fn test_empty_recording_is_decode_error() {
        let (mut controller, _, _) = controller();
        controller.start_recording(Instant::now()).unwrap();
        let job = controller.stop_recording().unwrap();
        controller.dispatch(job.run());

        assert_eq!(controller.session().state(), SessionState::Idle);
        assert!(controller.clip().is_none());
        assert_eq!(
            controller.status().recording_status,
            DecodeError::Empty.to_string()
        );
        assert!(controller.controls().record);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (mut controller, capture, _) = controller();
        assert!(controller.stop_recording().is_none());
        assert_eq!(capture.log.borrow().closes, 0);
        assert_eq!(controller.session().state(), SessionState::Idle);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let (mut controller, capture, _) = controller();
        controller.start_recording(Instant::now()).unwrap();
        assert_eq!(controller.start_recording(Instant::now()), Ok(None));
        assert_eq!(capture.log.borrow().opened.len(), 1);
    }

    #[test]
    fn test_permission_denied() {
        let capture = MockCapture::failing([
            CaptureError::PermissionDenied,
            CaptureError::PermissionDenied,
        ]);
        let (mut controller, capture, _) = controller_with(capture);

        let result = controller.start_recording(Instant::now());
        assert_eq!(result, Err(CaptureError::PermissionDenied));
        assert_eq!(controller.session().state(), SessionState::Idle);
        assert_eq!(
            controller.status().recording_status,
            "Microphone permission denied - please allow access in system settings"
        );
        assert!(controller.controls().record);
        assert_eq!(
            capture.log.borrow().opened,
            vec![CaptureConstraints::permissive(), CaptureConstraints::fallback()]
        );
    }

    #[test]
    fn test_constraint_fallback_succeeds() {
        let capture = MockCapture::failing([CaptureError::ConstraintError]);
        let (mut controller, capture, _) = controller_with(capture);

        assert!(controller.start_recording(Instant::now()).unwrap().is_some());
        assert!(controller.session().is_recording());
        assert_eq!(capture.log.borrow().opened.len(), 2);
    }

    #[test]
    fn test_failed_start_keeps_previous_clip() {
        let (mut controller, capture, _) = controller();
        record_clip(&mut controller, &capture, 1);

        capture
            .log
            .borrow_mut()
            .failures
            .extend([CaptureError::NoDevice, CaptureError::NoDevice]);
        assert!(controller.start_recording(Instant::now()).is_err());
        assert_eq!(controller.session().state(), SessionState::IdleWithClip);
        assert!(controller.clip().is_some());
        assert_eq!(
            controller.status().recording_status,
            "No microphone found on this device"
        );
    }

    #[test]
    fn test_auto_stop() {
        let (mut controller, _, _) = controller();
        let auto = controller.start_recording(Instant::now()).unwrap().unwrap();
        assert_eq!(auto.delay, controller.session().max_recording_time());

        let job = controller.dispatch(auto.into());
        assert!(job.is_some());
        assert_eq!(controller.session().state(), SessionState::Stopping);
    }

    #[test]
    fn test_manual_stop_disarms_auto_stop() {
        let (mut controller, capture, _) = controller();
        let auto = controller.start_recording(Instant::now()).unwrap().unwrap();
        emit_tone(&capture, 1);
        let job = controller.stop_recording().unwrap();

        assert!(controller.dispatch(auto.into()).is_none());
        controller.dispatch(job.run());
        assert_eq!(controller.session().state(), SessionState::IdleWithClip);
    }

    #[test]
    fn test_old_auto_stop_spares_new_recording() {
        let (mut controller, capture, _) = controller();
        let first = controller.start_recording(Instant::now()).unwrap().unwrap();
        emit_tone(&capture, 1);
        let job = controller.stop_recording().unwrap();
        controller.dispatch(job.run());

        let second = controller.start_recording(Instant::now()).unwrap().unwrap();
        assert_ne!(first.generation, second.generation);
        assert!(controller.dispatch(first.into()).is_none());
        assert!(controller.session().is_recording());
    }

    #[test]
    fn test_stale_decode_is_dropped() {
        let (mut controller, capture, _) = controller();

        controller.start_recording(Instant::now()).unwrap();
        emit_tone(&capture, 1);
        let stale = controller.stop_recording().unwrap();

        controller.start_recording(Instant::now()).unwrap();
        emit_tone(&capture, 2);
        let fresh = controller.stop_recording().unwrap();

        controller.dispatch(fresh.run());
        controller.dispatch(stale.run());

        let clip = controller.clip().unwrap();
        assert_eq!(clip.buffer().frames(), 2 * RATE as usize);
        assert_eq!(controller.session().state(), SessionState::IdleWithClip);
    }

    #[test]
    fn test_decode_after_new_start_is_dropped() {
        let (mut controller, capture, _) = controller();
        controller.start_recording(Instant::now()).unwrap();
        emit_tone(&capture, 1);
        let stale = controller.stop_recording().unwrap();

        controller.start_recording(Instant::now()).unwrap();
        controller.dispatch(stale.run());

        assert!(controller.session().is_recording());
        assert!(controller.clip().is_none());
    }

    #[test]
    fn test_play_requires_clip() {
        let (mut controller, _, graph) = controller();
        assert_eq!(controller.play(), Err(PlaybackError::NoClip));
        assert_eq!(graph.log.borrow().created, 0);

        controller.start_recording(Instant::now()).unwrap();
        assert_eq!(controller.play(), Err(PlaybackError::Busy));
    }

    #[test]
    fn test_play_builds_graph_with_gain() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 5);

        controller.play().unwrap();
        assert!(controller.session().is_playing());
        assert_eq!(controller.playback_gain(), Some(1.0));
        assert_eq!(controller.status().recording_status, "Playing...");
        assert!(controller.is_visualizing());
        assert_eq!(graph.log.borrow().started, vec![1]);
        assert!(controller.controls().pause);
    }

    #[test]
    fn test_anc_toggle_rewrites_live_gain() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 5);
        controller.play().unwrap();

        let mut surface = DisplayList::new(400.0, 200.0);
        assert!(controller.render_frame(&mut surface));
        assert_eq!(trace_colour(&surface), CALM);

        controller.set_anc_mode(true);
        assert_eq!(controller.playback_gain(), Some(-1.0));
        assert_eq!(controller.status().anc_status, "On");
        assert!(controller.render_frame(&mut surface));
        assert_eq!(trace_colour(&surface), ALERT);

        controller.set_anc_mode(false);
        assert_eq!(controller.playback_gain(), Some(1.0));

        let log = graph.log.borrow();
        assert_eq!(log.created, 1);
        assert_eq!(log.started, vec![1]);
        assert!(log.stopped.is_empty());
        assert_eq!(log.gains, vec![(1, 1.0), (1, -1.0), (1, 1.0)]);
        assert!(controller.session().is_playing());
    }

    #[test]
    fn test_anc_before_play_sets_initial_gain() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 1);
        controller.set_anc_mode(true);
        controller.play().unwrap();
        assert_eq!(graph.log.borrow().last_gain(1), Some(-1.0));
    }

    #[test]
    fn test_play_replaces_previous_handle() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 1);

        controller.play().unwrap();
        controller.play().unwrap();

        let log = graph.log.borrow();
        assert_eq!(log.created, 2);
        assert_eq!(log.stopped, vec![1]);
        assert_eq!(log.started, vec![1, 2]);
        assert!(controller.session().is_playing());
    }

    #[test]
    fn test_pause() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 1);
        controller.play().unwrap();

        controller.pause();
        assert_eq!(controller.session().state(), SessionState::Paused);
        assert_eq!(controller.status().recording_status, "Paused");
        assert!(controller.playback_gain().is_none());
        assert!(!controller.is_visualizing());
        assert_eq!(graph.log.borrow().stopped, vec![1]);

        let mut surface = DisplayList::new(100.0, 100.0);
        assert!(!controller.render_frame(&mut surface));
        assert!(controller.controls().play);
    }

    #[test]
    fn test_natural_end() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 1);
        controller.play().unwrap();

        assert!(graph.log.borrow_mut().finish(1));
        assert!(controller.poll_events().is_empty());

        assert_eq!(controller.session().state(), SessionState::IdleWithClip);
        assert_eq!(controller.status().recording_status, "Playback complete");
        assert!(!controller.is_visualizing());
        assert!(controller.playback_gain().is_none());
    }

    #[test]
    fn test_end_of_replaced_handle_is_ignored() {
        let (mut controller, capture, _) = controller();
        record_clip(&mut controller, &capture, 1);
        controller.play().unwrap();
        controller.play().unwrap();

        controller
            .event_sender()
            .send(ControllerEvent::PlaybackEnded { playback: 1 })
            .unwrap();
        controller.poll_events();
        assert!(controller.session().is_playing());
    }

    #[test]
    fn test_recording_stops_playback() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 1);
        controller.play().unwrap();

        controller.start_recording(Instant::now()).unwrap();
        assert!(controller.session().is_recording());
        assert!(!controller.session().is_playing());
        assert!(controller.clip().is_none());
        assert_eq!(graph.log.borrow().stopped, vec![1]);
    }

    #[test]
    fn test_playback_start_failure() {
        let (mut controller, capture, graph) = controller();
        record_clip(&mut controller, &capture, 1);
        graph.log.borrow_mut().fail_next_start = true;

        assert!(matches!(controller.play(), Err(PlaybackError::Backend(_))));
        assert_eq!(controller.session().state(), SessionState::IdleWithClip);
        assert!(controller.playback_gain().is_none());
        assert!(controller
            .status()
            .recording_status
            .starts_with("Playback failed"));
    }

    #[test]
    fn test_visualization_mode_switch() {
        let (mut controller, capture, _) = controller();
        record_clip(&mut controller, &capture, 1);
        controller.play().unwrap();

        let mut surface = DisplayList::new(400.0, 200.0);
        controller.set_visualization_mode(VisualizationMode::Spectrum);
        controller.render_frame(&mut surface);
        assert_eq!(
            surface.texts().next().unwrap().0,
            "Frequency Spectrum (Normal)"
        );
        assert_eq!(
            controller.snapshot(SnapshotKind::Frequency).map(|s| s.len()),
            Some(1024)
        );
    }

    #[test]
    fn test_settings_apply() {
        let settings = Settings {
            anc_on_start: true,
            visualization_mode: VisualizationMode::Spectrum,
            ..Settings::default()
        };
        let controller: TestController =
            Controller::new(&settings, MockCapture::default(), WavDecoder, MockGraph::default());
        assert!(controller.session().anc_mode);
        assert_eq!(controller.status().anc_status, "On");
        assert_eq!(
            controller.session().visualization_mode,
            VisualizationMode::Spectrum
        );
    }

    /// Small deterministic generator for the interleaving test
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    fn assert_invariants(controller: &TestController) {
        let session = controller.session();
        assert!(!(session.is_recording() && session.is_playing()));
        assert_eq!(controller.playback.is_some(), session.is_playing());
        if session.is_playing() {
            let gain = controller.playback_gain().unwrap();
            assert_eq!(gain, session.gain());
        }
        if session.state() == SessionState::IdleWithClip {
            assert!(controller.clip.is_some());
        }
    }

    #[test]
    fn test_random_interleavings_keep_invariants() {
        for seed in 0..40 {
            let (mut controller, capture, graph) = controller();
            let mut rng = Lcg(seed);
            let mut jobs: Vec<DecodeJob<WavDecoder>> = Vec::new();
            let mut timers: Vec<AutoStop> = Vec::new();
            let mut surface = DisplayList::new(320.0, 160.0);

            for _ in 0..200 {
                match rng.next(11) {
                    0 => {
                        if let Ok(Some(auto)) = controller.start_recording(Instant::now()) {
                            timers.push(auto);
                            emit_tone(&capture, 1);
                        }
                    }
                    1 => jobs.extend(controller.stop_recording()),
                    2 if !jobs.is_empty() => {
                        let index = rng.next(jobs.len() as u64) as usize;
                        let job = jobs.remove(index);
                        jobs.extend(controller.dispatch(job.run()));
                    }
                    3 if !timers.is_empty() => {
                        let index = rng.next(timers.len() as u64) as usize;
                        let timer = timers.remove(index);
                        jobs.extend(controller.dispatch(timer.into()));
                    }
                    4 => {
                        let _ = controller.play();
                    }
                    5 => controller.pause(),
                    6 => controller.set_anc_mode(rng.next(2) == 0),
                    7 => {
                        let created = graph.log.borrow().created;
                        if created > 0 {
                            let id = rng.next(created as u64) as usize + 1;
                            graph.log.borrow_mut().finish(id);
                        }
                        jobs.extend(controller.poll_events());
                    }
                    8 => controller.tick(Instant::now()),
                    9 => {
                        controller.render_frame(&mut surface);
                    }
                    _ => controller.set_visualization_mode(if rng.next(2) == 0 {
                        VisualizationMode::Waveform
                    } else {
                        VisualizationMode::Spectrum
                    }),
                }
                assert_invariants(&controller);
            }
        }
    }

    #[test]
    fn test_frame_without_playback_draws_nothing() {
        let (mut controller, _, _) = controller();
        let mut surface = DisplayList::new(100.0, 100.0);
        assert!(!controller.render_frame(&mut surface));
        assert!(surface.commands().is_empty());
        assert!(controller.snapshot(SnapshotKind::TimeDomain).is_none());
    }
}
