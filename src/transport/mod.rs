//! Streaming transport contract for the hosted speech endpoint.
//!
//! The session opens one bidirectional audio session through [`Transport`],
//! streams uplink PCM through the returned [`TransportHandle`], and receives
//! `open`/`message`/`error`/`close` callbacks as [`TransportEvent`]s on its
//! own event queue.

pub mod loopback;
pub mod mock;

use crate::audio::pcm::PcmBlob;
use crate::defaults;
use crate::error::Result;
use crate::session::SessionEvent;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

pub use loopback::LoopbackTransport;
pub use mock::MockTransport;

/// Output modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
}

/// Session configuration sent with `connect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    pub response_modality: Modality,
    pub voice: String,
    /// Persona text; opaque to the session.
    pub system_instruction: String,
}

/// Everything needed to open one hosted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub model_id: String,
    pub config: LiveConfig,
}

impl Default for ConnectRequest {
    fn default() -> Self {
        Self {
            model_id: defaults::MODEL_ID.to_string(),
            config: LiveConfig {
                response_modality: Modality::Audio,
                voice: defaults::VOICE.to_string(),
                system_instruction: defaults::SYSTEM_INSTRUCTION.to_string(),
            },
        }
    }
}

/// One inline audio part of a server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineAudio {
    pub mime_type: String,
    /// Base64 little-endian 16-bit PCM.
    pub data: String,
}

/// Decoded server message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub audio: Vec<InlineAudio>,
    /// The user started speaking over the model; drop queued audio.
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl ServerMessage {
    pub fn audio(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            audio: vec![InlineAudio {
                mime_type: mime_type.into(),
                data: data.into(),
            }],
            ..Self::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Self::default()
        }
    }
}

/// Callback delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(ServerMessage),
    Error(String),
    Close,
}

/// Callback sink handed to [`Transport::connect`].
///
/// Every event is tagged with the session epoch so late callbacks from an
/// old connection are ignored.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    session: u64,
    tx: Sender<SessionEvent>,
}

impl TransportEvents {
    pub fn new(session: u64, tx: Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn emit(&self, event: TransportEvent) {
        let event = SessionEvent::Transport {
            session: self.session,
            event,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(session = self.session, "session gone, dropping transport callback");
        }
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub fn message(&self, message: ServerMessage) {
        self.emit(TransportEvent::Message(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Error(message.into()));
    }

    pub fn close(&self) {
        self.emit(TransportEvent::Close);
    }
}

/// The hosted bidirectional audio endpoint.
pub trait Transport {
    /// Begin connecting. `Open` (or `Error`/`Close`) arrives later on `events`.
    ///
    /// # Errors
    /// `ConciergeError::ConnectFailure` when the attempt cannot even be made.
    fn connect(
        &mut self,
        request: &ConnectRequest,
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>>;
}

/// An open (or opening) hosted session.
pub trait TransportHandle {
    /// Send one uplink PCM frame.
    fn send_realtime_input(&mut self, blob: &PcmBlob) -> Result<()>;

    /// Close the session. Closing an already-closed session is a no-op.
    fn close(&mut self) -> Result<()>;
}
