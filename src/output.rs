//! Terminal rendering of session snapshots.

use crate::session::{SessionSnapshot, SessionState};
use owo_colors::OwoColorize;

/// One status line for a state change, e.g. `● active  session 1`.
pub fn render_snapshot(snapshot: &SessionSnapshot, color: bool) -> String {
    let state = snapshot.state.to_string();
    let state = if color {
        match snapshot.state {
            SessionState::Idle | SessionState::Closed => state.dimmed().to_string(),
            SessionState::Connecting => state.yellow().to_string(),
            SessionState::Active => state.green().bold().to_string(),
            SessionState::Errored => state.red().bold().to_string(),
        }
    } else {
        state
    };

    let mut line = format!("● {}  session {}", state, snapshot.epoch);
    if let Some(error) = &snapshot.error {
        line.push_str("  ");
        if color {
            line.push_str(&error.red().to_string());
        } else {
            line.push_str(error);
        }
    }
    line
}

/// Counters for the end of a session.
pub fn render_summary(snapshot: &SessionSnapshot) -> String {
    format!(
        "{} frames sent, {} dropped, {} replies scheduled, {} interruptions",
        snapshot.frames_sent,
        snapshot.frames_dropped,
        snapshot.chunks_scheduled,
        snapshot.interruptions
    )
}

/// Snapshot as a single JSON line.
pub fn render_json(snapshot: &SessionSnapshot) -> serde_json::Result<String> {
    serde_json::to_string(snapshot)
}
