//! Session lifecycle states, the event enum and the UI-facing snapshot.

use crate::audio::backend::SourceId;
use crate::transport::TransportEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closed,
    Errored,
}

impl SessionState {
    /// States in which the session holds a transport handle.
    pub fn holds_transport(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    /// States from which `start()` begins a new session.
    pub fn can_start(self) -> bool {
        !self.holds_transport()
    }

    pub fn is_finished(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Everything that can happen to a session, in dispatch order.
///
/// Callback-originated events carry the epoch of the session that produced
/// them; events from an earlier epoch are discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// User asked to start talking.
    Start,
    /// User asked to hang up.
    Stop,
    /// Stop and leave the dispatch loop.
    Shutdown,
    Transport {
        session: u64,
        event: TransportEvent,
    },
    /// One assembled uplink frame from the capture thread.
    CaptureFrame {
        session: u64,
        samples: Vec<f32>,
    },
    /// A playback source finished on its own.
    SourceEnded {
        session: u64,
        source: SourceId,
    },
}

/// Read model of the session for rendering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub epoch: u64,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub interruptions: u64,
    pub active_sources: usize,
}
