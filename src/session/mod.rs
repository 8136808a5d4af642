//! Voice session lifecycle: state machine, events and the dispatch loop.

pub mod driver;
pub mod manager;
pub mod state;

pub use driver::{SessionControl, SessionDriver};
pub use manager::{SessionSettings, VoiceSession};
pub use state::{SessionEvent, SessionSnapshot, SessionState};
