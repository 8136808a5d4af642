//! The voice session state machine.
//!
//! Owns every per-session resource (transport handle, capture context,
//! microphone, uplink pipeline, playback scheduler) and moves between
//! Idle → Connecting → Active → Closed/Errored as events arrive. Every way
//! out of Connecting/Active goes through [`VoiceSession::release`].

use crate::audio::backend::{
    AudioBackend, CaptureContext, MicrophoneStream, SourceEndedNotifier,
};
use crate::audio::capture::{CapturePipeline, FrameOutcome};
use crate::audio::pcm::parse_pcm_rate;
use crate::audio::playback::PlaybackScheduler;
use crate::config::Config;
use crate::defaults;
use crate::error::{ConciergeError, Result};
use crate::session::state::{SessionEvent, SessionSnapshot, SessionState};
use crate::transport::{
    ConnectRequest, LiveConfig, Modality, ServerMessage, Transport, TransportEvent,
    TransportEvents, TransportHandle,
};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

/// Fixed parameters of every session started by one [`VoiceSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub request: ConnectRequest,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request: ConnectRequest::default(),
            capture_sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request: ConnectRequest {
                model_id: config.model.model_id.clone(),
                config: LiveConfig {
                    response_modality: Modality::Audio,
                    voice: config.model.voice.clone(),
                    system_instruction: config.model.instruction(),
                },
            },
            capture_sample_rate: config.audio.capture_sample_rate,
            playback_sample_rate: config.audio.playback_sample_rate,
            frame_size: config.audio.frame_size,
        }
    }
}

pub struct VoiceSession {
    settings: SessionSettings,
    backend: Box<dyn AudioBackend>,
    transport: Box<dyn Transport>,
    events: Sender<SessionEvent>,
    epoch: u64,
    state: SessionState,
    error: Option<String>,
    handle: Option<Box<dyn TransportHandle>>,
    capture_context: Option<Box<dyn CaptureContext>>,
    microphone: Option<Box<dyn MicrophoneStream>>,
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackScheduler>,
}

impl VoiceSession {
    /// Create an idle session. Callbacks are posted to `events`, which the
    /// owner must feed back into [`handle_event`](Self::handle_event).
    pub fn new(
        settings: SessionSettings,
        backend: Box<dyn AudioBackend>,
        transport: Box<dyn Transport>,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            settings,
            backend,
            transport,
            events,
            epoch: 0,
            state: SessionState::Idle,
            error: None,
            handle: None,
            capture_context: None,
            microphone: None,
            capture: None,
            playback: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// User-facing message, present only while Errored.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_transport(&self) -> bool {
        self.handle.is_some()
    }

    /// Current playback cursor, if a scheduler exists.
    pub fn next_start_time(&self) -> Option<f64> {
        self.playback.as_ref().map(PlaybackScheduler::next_start_time)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (frames_sent, frames_dropped) = self
            .capture
            .as_ref()
            .map(|c| (c.frames_sent(), c.frames_dropped()))
            .unwrap_or_default();
        let (chunks_scheduled, interruptions, active_sources) = self
            .playback
            .as_ref()
            .map(|p| (p.chunks_scheduled(), p.interruptions(), p.active_sources()))
            .unwrap_or_default();
        SessionSnapshot {
            epoch: self.epoch,
            state: self.state,
            error: self.error.clone(),
            frames_sent,
            frames_dropped,
            chunks_scheduled,
            interruptions,
            active_sources,
        }
    }

    /// Begin a new session: open both audio contexts, acquire the microphone
    /// and start connecting.
    ///
    /// On failure everything acquired so far is released, the session is
    /// Errored, and the error is returned. A denied microphone means no
    /// connection attempt is made.
    pub fn start(&mut self) -> Result<()> {
        if !self.state.can_start() {
            return Err(ConciergeError::InvalidTransition {
                state: self.state.to_string(),
                action: "start".to_string(),
            });
        }

        self.epoch += 1;
        self.error = None;
        self.capture = None;
        self.playback = None;
        info!(epoch = self.epoch, model = %self.settings.request.model_id, "starting voice session");

        match self.acquire() {
            Ok(()) => {
                self.state = SessionState::Connecting;
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn acquire(&mut self) -> Result<()> {
        let capture_context = self
            .backend
            .open_capture_context(self.settings.capture_sample_rate)?;
        self.capture_context = Some(capture_context);

        let notifier = SourceEndedNotifier::new(self.epoch, self.events.clone());
        let playback_context = self
            .backend
            .open_playback_context(self.settings.playback_sample_rate, notifier)?;
        self.playback = Some(PlaybackScheduler::new(playback_context));

        let microphone = self.backend.request_microphone()?;
        debug!(device = microphone.label(), "microphone granted");
        self.microphone = Some(microphone);

        let callbacks = TransportEvents::new(self.epoch, self.events.clone());
        let handle = self
            .transport
            .connect(&self.settings.request, callbacks)
            .map_err(|e| match e {
                ConciergeError::ConnectFailure { .. } => e,
                other => ConciergeError::ConnectFailure {
                    message: other.to_string(),
                },
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Hang up. A no-op unless Connecting or Active.
    pub fn stop(&mut self) {
        if self.state.holds_transport() {
            info!(epoch = self.epoch, "stopping voice session");
            self.release();
            self.state = SessionState::Closed;
        } else {
            debug!(state = %self.state, "stop ignored");
        }
    }

    /// Dispatch one event. Never panics, whatever the state.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start => {
                if let Err(e) = self.start() {
                    warn!(error = %e, "start failed");
                }
            }
            SessionEvent::Stop | SessionEvent::Shutdown => self.stop(),
            SessionEvent::Transport { session, event } if session == self.epoch => {
                self.on_transport(event)
            }
            SessionEvent::CaptureFrame { session, samples } if session == self.epoch => {
                self.on_capture_frame(&samples)
            }
            SessionEvent::SourceEnded { session, source } if session == self.epoch => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.source_ended(source);
                }
            }
            stale => debug!(?stale, epoch = self.epoch, "ignoring event from an earlier session"),
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match (self.state, event) {
            (SessionState::Connecting, TransportEvent::Open) => self.activate(),
            (SessionState::Active, TransportEvent::Message(message)) => self.on_message(message),
            (SessionState::Connecting, TransportEvent::Error(message)) => {
                self.fail(&ConciergeError::ConnectFailure { message })
            }
            (SessionState::Active, TransportEvent::Error(message)) => {
                self.fail(&ConciergeError::Transport { message })
            }
            (SessionState::Connecting, TransportEvent::Close) => {
                self.fail(&ConciergeError::ConnectFailure {
                    message: "connection closed before it opened".to_string(),
                })
            }
            (SessionState::Active, TransportEvent::Close) => {
                info!(epoch = self.epoch, "{}", ConciergeError::RemoteClose);
                self.release();
                self.state = SessionState::Closed;
            }
            (state, event) => debug!(%state, ?event, "ignoring transport event"),
        }
    }

    fn activate(&mut self) {
        let pipeline =
            CapturePipeline::new(self.settings.capture_sample_rate, self.settings.frame_size);
        let sink = pipeline.sink(self.epoch, self.events.clone());

        let attached = match (self.capture_context.as_mut(), self.microphone.take()) {
            (Some(context), Some(microphone)) => context.attach(microphone, sink),
            _ => Err(ConciergeError::AudioCapture {
                message: "capture resources missing at open".to_string(),
            }),
        };

        match attached {
            Ok(()) => {
                self.capture = Some(pipeline);
                self.state = SessionState::Active;
                info!(epoch = self.epoch, "voice session active");
            }
            Err(e) => self.fail(&e),
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };

        if message.interrupted {
            let stopped = playback.interrupt();
            debug!(stopped, "model interrupted, playback cleared");
        }

        let playback_rate = self.settings.playback_sample_rate;
        for part in &message.audio {
            let rate = parse_pcm_rate(&part.mime_type).unwrap_or(playback_rate);
            let scheduled = if rate == playback_rate {
                playback.enqueue(&part.data)
            } else {
                playback.enqueue_at_rate(&part.data, rate)
            };
            match scheduled {
                Ok(Some(buffer)) => debug!(
                    start = buffer.start_time,
                    duration = buffer.duration,
                    "scheduled model audio"
                ),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "dropping model audio chunk"),
            }
        }

        if message.turn_complete {
            debug!("model turn complete");
        }
    }

    fn on_capture_frame(&mut self, samples: &[f32]) {
        if self.state != SessionState::Active {
            return;
        }
        let (Some(capture), Some(handle)) = (self.capture.as_mut(), self.handle.as_mut()) else {
            return;
        };
        if capture.process_frame(samples, handle.as_mut()) == FrameOutcome::TransportFailed {
            self.fail(&ConciergeError::Transport {
                message: "repeated failures sending microphone audio".to_string(),
            });
        }
    }

    fn fail(&mut self, error: &ConciergeError) {
        warn!(epoch = self.epoch, error = %error, "voice session failed");
        self.release();
        self.state = SessionState::Errored;
        self.error = Some(error.user_message());
    }

    /// Single teardown path: stop uplink first, then close the transport,
    /// the capture context and playback, and drop a microphone that was
    /// never attached.
    fn release(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            capture.close();
        }
        if let Some(mut handle) = self.handle.take()
            && let Err(e) = handle.close()
        {
            warn!(error = %e, "closing transport failed");
        }
        if let Some(mut context) = self.capture_context.take() {
            context.close();
        }
        if let Some(playback) = self.playback.as_mut() {
            playback.teardown();
        }
        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.release();
    }
}
