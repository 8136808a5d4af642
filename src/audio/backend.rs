//! Platform audio seams: microphone access, capture and playback contexts.
//!
//! The session only talks to these traits, so the cpal backend and the mock
//! used by tests are interchangeable.

use crate::error::{ConciergeError, Result};
use crate::session::SessionEvent;
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives mono f32 capture buffers at the capture context rate.
///
/// Called from the audio thread; buffers may have any length.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send>;

/// Handle of one scheduled playback buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Reports playback sources that finished on their own.
#[derive(Debug, Clone)]
pub struct SourceEndedNotifier {
    session: u64,
    tx: Sender<SessionEvent>,
}

impl SourceEndedNotifier {
    pub fn new(session: u64, tx: Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn notify(&self, source: SourceId) {
        let event = SessionEvent::SourceEnded {
            session: self.session,
            source,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(?source, "session gone, dropping source-ended notification");
        }
    }
}

/// A granted, live microphone stream.
pub trait MicrophoneStream: Send {
    /// Human-readable device name.
    fn label(&self) -> &str;

    /// Begin delivering mono buffers at `sample_rate` to `sink`.
    fn start(&mut self, sample_rate: u32, sink: FrameSink) -> Result<()>;

    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);
}

/// Processing context tuned to the capture sample rate.
pub trait CaptureContext {
    fn sample_rate(&self) -> u32;

    /// Route the microphone through this context into `sink`.
    fn attach(&mut self, microphone: Box<dyn MicrophoneStream>, sink: FrameSink) -> Result<()>;

    /// Stop frame delivery, stop the microphone and release the context. Idempotent.
    fn close(&mut self);
}

/// Output context tuned to the playback sample rate.
pub trait PlaybackContext {
    fn sample_rate(&self) -> u32;

    /// Output clock in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `samples` (mono, context rate) to begin at `start_time` seconds.
    fn start_source(&mut self, samples: Vec<f32>, start_time: f64) -> Result<SourceId>;

    /// Stop a source immediately. Unknown or finished sources are ignored.
    fn stop_source(&mut self, source: SourceId);

    /// Release the output device. Idempotent.
    fn close(&mut self);
}

/// Factory for the platform media resources one session needs.
pub trait AudioBackend {
    fn open_capture_context(&mut self, sample_rate: u32) -> Result<Box<dyn CaptureContext>>;

    fn open_playback_context(
        &mut self,
        sample_rate: u32,
        notifier: SourceEndedNotifier,
    ) -> Result<Box<dyn PlaybackContext>>;

    /// Ask for an audio-only microphone stream.
    ///
    /// # Errors
    /// `ConciergeError::PermissionDenied` when access is refused.
    fn request_microphone(&mut self) -> Result<Box<dyn MicrophoneStream>>;
}

/// Source recorded by the mock playback context.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSource {
    pub id: SourceId,
    pub start_time: f64,
    pub duration: f64,
    pub samples: usize,
}

#[derive(Default)]
struct MockAudioState {
    deny_microphone: bool,
    fail_playback_open: bool,
    clock: f64,
    capture_opened: usize,
    capture_closed: usize,
    playback_opened: usize,
    playback_closed: usize,
    microphone_requests: usize,
    microphones_live: usize,
    sink: Option<FrameSink>,
    notifier: Option<SourceEndedNotifier>,
    started: Vec<StartedSource>,
    stopped: Vec<SourceId>,
    next_source: u64,
}

fn lock(state: &Mutex<MockAudioState>) -> MutexGuard<'_, MockAudioState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock audio backend for testing.
///
/// The clock only moves when told to, and capture frames are injected through
/// the [`MockAudioProbe`].
#[derive(Clone, Default)]
pub struct MockAudioBackend {
    state: Arc<Mutex<MockAudioState>>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to refuse microphone access
    pub fn with_microphone_denied(self) -> Self {
        lock(&self.state).deny_microphone = true;
        self
    }

    /// Configure the mock to fail opening the playback context
    pub fn with_playback_open_failure(self) -> Self {
        lock(&self.state).fail_playback_open = true;
        self
    }

    /// Handle for inspecting and driving the mock after it is moved into a session.
    pub fn probe(&self) -> MockAudioProbe {
        MockAudioProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl AudioBackend for MockAudioBackend {
    fn open_capture_context(&mut self, sample_rate: u32) -> Result<Box<dyn CaptureContext>> {
        lock(&self.state).capture_opened += 1;
        Ok(Box::new(MockCaptureContext {
            state: Arc::clone(&self.state),
            sample_rate,
            microphone: None,
            closed: false,
        }))
    }

    fn open_playback_context(
        &mut self,
        sample_rate: u32,
        notifier: SourceEndedNotifier,
    ) -> Result<Box<dyn PlaybackContext>> {
        let mut state = lock(&self.state);
        if state.fail_playback_open {
            return Err(ConciergeError::AudioPlayback {
                message: "mock output device unavailable".to_string(),
            });
        }
        state.playback_opened += 1;
        state.notifier = Some(notifier);
        Ok(Box::new(MockPlaybackContext {
            state: Arc::clone(&self.state),
            sample_rate,
            closed: false,
        }))
    }

    fn request_microphone(&mut self) -> Result<Box<dyn MicrophoneStream>> {
        let mut state = lock(&self.state);
        state.microphone_requests += 1;
        if state.deny_microphone {
            return Err(ConciergeError::PermissionDenied {
                message: "NotAllowedError: permission denied by user".to_string(),
            });
        }
        state.microphones_live += 1;
        Ok(Box::new(MockMicrophone {
            state: Arc::clone(&self.state),
            stopped: false,
        }))
    }
}

/// Test-side view of a [`MockAudioBackend`].
#[derive(Clone)]
pub struct MockAudioProbe {
    state: Arc<Mutex<MockAudioState>>,
}

impl MockAudioProbe {
    pub fn set_time(&self, seconds: f64) {
        lock(&self.state).clock = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        lock(&self.state).clock += seconds;
    }

    pub fn time(&self) -> f64 {
        lock(&self.state).clock
    }

    /// Push a capture buffer through the attached sink, as the audio thread would.
    ///
    /// Returns false when nothing is attached.
    pub fn emit_frame(&self, samples: &[f32]) -> bool {
        let mut state = lock(&self.state);
        match state.sink.as_mut() {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }

    /// Report a source as finished, as the output device would.
    pub fn finish_source(&self, source: SourceId) {
        let notifier = lock(&self.state).notifier.clone();
        if let Some(notifier) = notifier {
            notifier.notify(source);
        }
    }

    pub fn capture_attached(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    /// Capture and playback contexts opened and not yet closed.
    pub fn open_contexts(&self) -> usize {
        let state = lock(&self.state);
        (state.capture_opened - state.capture_closed)
            + (state.playback_opened - state.playback_closed)
    }

    pub fn contexts_opened(&self) -> usize {
        let state = lock(&self.state);
        state.capture_opened + state.playback_opened
    }

    pub fn microphone_requests(&self) -> usize {
        lock(&self.state).microphone_requests
    }

    pub fn microphone_live(&self) -> bool {
        lock(&self.state).microphones_live > 0
    }

    pub fn started_sources(&self) -> Vec<StartedSource> {
        lock(&self.state).started.clone()
    }

    pub fn stopped_sources(&self) -> Vec<SourceId> {
        lock(&self.state).stopped.clone()
    }
}

struct MockMicrophone {
    state: Arc<Mutex<MockAudioState>>,
    stopped: bool,
}

impl MicrophoneStream for MockMicrophone {
    fn label(&self) -> &str {
        "mock microphone"
    }

    fn start(&mut self, _sample_rate: u32, sink: FrameSink) -> Result<()> {
        if self.stopped {
            return Err(ConciergeError::AudioCapture {
                message: "microphone already stopped".to_string(),
            });
        }
        lock(&self.state).sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            let mut state = lock(&self.state);
            state.microphones_live -= 1;
            state.sink = None;
        }
    }
}

impl Drop for MockMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

struct MockCaptureContext {
    state: Arc<Mutex<MockAudioState>>,
    sample_rate: u32,
    microphone: Option<Box<dyn MicrophoneStream>>,
    closed: bool,
}

impl CaptureContext for MockCaptureContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn attach(
        &mut self,
        mut microphone: Box<dyn MicrophoneStream>,
        sink: FrameSink,
    ) -> Result<()> {
        if self.closed {
            return Err(ConciergeError::AudioCapture {
                message: "capture context already closed".to_string(),
            });
        }
        microphone.start(self.sample_rate, sink)?;
        self.microphone = Some(microphone);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = lock(&self.state);
            state.sink = None;
            state.capture_closed += 1;
        }
        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
    }
}

impl Drop for MockCaptureContext {
    fn drop(&mut self) {
        self.close();
    }
}

struct MockPlaybackContext {
    state: Arc<Mutex<MockAudioState>>,
    sample_rate: u32,
    closed: bool,
}

impl PlaybackContext for MockPlaybackContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).clock
    }

    fn start_source(&mut self, samples: Vec<f32>, start_time: f64) -> Result<SourceId> {
        if self.closed {
            return Err(ConciergeError::AudioPlayback {
                message: "playback context already closed".to_string(),
            });
        }
        let mut state = lock(&self.state);
        state.next_source += 1;
        let id = SourceId(state.next_source);
        state.started.push(StartedSource {
            id,
            start_time,
            duration: samples.len() as f64 / self.sample_rate as f64,
            samples: samples.len(),
        });
        Ok(id)
    }

    fn stop_source(&mut self, source: SourceId) {
        lock(&self.state).stopped.push(source);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.state).playback_closed += 1;
        }
    }
}

impl Drop for MockPlaybackContext {
    fn drop(&mut self) {
        self.close();
    }
}
