//! In-memory capture service and playback graph for tests

use crate::audio::{
    CaptureConstraints, CaptureService, CaptureStream, EncodedChunk, PlaybackGraph,
    PlaybackHandle, SampleBuffer, SnapshotKind,
};
use crate::error::{CaptureError, PlaybackError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct CaptureLog {
    /// Constraints of every open attempt, in order
    pub opened: Vec<CaptureConstraints>,
    /// Errors returned by the next open attempts
    pub failures: VecDeque<CaptureError>,
    /// Chunks the live stream has emitted but nobody has taken
    pub pending: Vec<EncodedChunk>,
    pub closes: usize,
    pub live: bool,
}

#[derive(Clone, Default)]
pub struct MockCapture {
    pub log: Rc<RefCell<CaptureLog>>,
}

impl MockCapture {
    pub fn failing(errors: impl IntoIterator<Item = CaptureError>) -> Self {
        let capture = Self::default();
        capture.log.borrow_mut().failures.extend(errors);
        capture
    }

    /// Simulate the device emitting a chunk
    pub fn emit(&self, chunk: EncodedChunk) {
        self.log.borrow_mut().pending.push(chunk);
    }
}

impl CaptureService for MockCapture {
    type Stream = MockStream;

    fn open(&mut self, constraints: &CaptureConstraints) -> Result<MockStream, CaptureError> {
        let mut log = self.log.borrow_mut();
        log.opened.push(*constraints);
        if let Some(error) = log.failures.pop_front() {
            return Err(error);
        }
        log.live = true;
        Ok(MockStream {
            log: self.log.clone(),
        })
    }
}

pub struct MockStream {
    log: Rc<RefCell<CaptureLog>>,
}

impl CaptureStream for MockStream {
    fn take_chunks(&mut self) -> Vec<EncodedChunk> {
        std::mem::take(&mut self.log.borrow_mut().pending)
    }

    fn close(self) -> Vec<EncodedChunk> {
        let mut log = self.log.borrow_mut();
        log.closes += 1;
        log.live = false;
        std::mem::take(&mut log.pending)
    }
}

#[derive(Default)]
pub struct GraphLog {
    pub created: usize,
    pub started: Vec<usize>,
    pub stopped: Vec<usize>,
    /// Every gain written, by handle id
    pub gains: Vec<(usize, f32)>,
    pub ended: Vec<(usize, EndedCallback)>,
    pub fail_next_start: bool,
}

impl GraphLog {
    /// Fire the ended callback of handle `id`, as if its clip ran out
    pub fn finish(&mut self, id: usize) -> bool {
        match self.ended.iter().position(|(h, _)| *h == id) {
            Some(index) => {
                let (_, callback) = self.ended.remove(index);
                callback();
                true
            }
            None => false,
        }
    }

    pub fn last_gain(&self, id: usize) -> Option<f32> {
        self.gains.iter().rev().find(|(h, _)| *h == id).map(|(_, g)| *g)
    }
}

#[derive(Clone, Default)]
pub struct MockGraph {
    pub log: Rc<RefCell<GraphLog>>,
}

impl PlaybackGraph for MockGraph {
    type Handle = MockPlayback;

    fn create(
        &mut self,
        _buffer: Arc<SampleBuffer>,
        fft_size: usize,
    ) -> Result<MockPlayback, PlaybackError> {
        let mut log = self.log.borrow_mut();
        log.created += 1;
        Ok(MockPlayback {
            id: log.created,
            gain: 1.0,
            fft_size,
            snapshot: None,
            kinds: RefCell::new(Vec::new()),
            log: self.log.clone(),
        })
    }
}

pub struct MockPlayback {
    pub id: usize,
    gain: f32,
    fft_size: usize,
    snapshot: Option<Vec<u8>>,
    kinds: RefCell<Vec<SnapshotKind>>,
    log: Rc<RefCell<GraphLog>>,
}

impl MockPlayback {
    /// Standalone handle returning `data` for every snapshot
    pub fn with_snapshot(data: Vec<u8>) -> Self {
        Self {
            id: 0,
            gain: 1.0,
            fft_size: data.len(),
            snapshot: Some(data),
            kinds: RefCell::new(Vec::new()),
            log: Rc::default(),
        }
    }

    pub fn snapshot_kinds(&self) -> Vec<SnapshotKind> {
        self.kinds.borrow().clone()
    }
}

impl PlaybackHandle for MockPlayback {
    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
        self.log.borrow_mut().gains.push((self.id, gain));
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn start(&mut self) -> Result<(), PlaybackError> {
        let mut log = self.log.borrow_mut();
        if log.fail_next_start {
            log.fail_next_start = false;
            return Err(PlaybackError::Backend("device busy".to_string()));
        }
        log.started.push(self.id);
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.borrow_mut();
        log.stopped.push(self.id);
        // A stopped handle never reports a natural end
        log.ended.retain(|(h, _)| *h != self.id);
    }

    fn on_ended(&mut self, callback: EndedCallback) {
        self.log.borrow_mut().ended.push((self.id, callback));
    }

    fn snapshot(&self, kind: SnapshotKind) -> Vec<u8> {
        self.kinds.borrow_mut().push(kind);
        if let Some(data) = &self.snapshot {
            return data.clone();
        }
        match kind {
            SnapshotKind::TimeDomain => vec![128; self.fft_size],
            SnapshotKind::Frequency => vec![0; self.fft_size / 2],
        }
    }
}
