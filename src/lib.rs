//! concierge - real-time voice sessions
//!
//! Streams microphone audio to a voice model as 16-bit PCM and schedules the
//! spoken reply for gapless playback, with barge-in interruption.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
pub mod persona;
pub mod session;
pub mod transport;

// Composition root - needs real devices and the CLI stack
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Platform seams
pub use audio::backend::{AudioBackend, CaptureContext, MicrophoneStream, PlaybackContext};
pub use transport::{Transport, TransportHandle};

// Session
pub use session::{
    SessionControl, SessionDriver, SessionEvent, SessionSettings, SessionSnapshot, SessionState,
    VoiceSession,
};

// Error handling
pub use error::{ConciergeError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn manifest_gates_cli_only_dependencies() {
        let manifest: toml::Table = toml::from_str(include_str!("../Cargo.toml")).unwrap();
        let cli = manifest["features"]["cli"].as_array().unwrap();
        for dep in ["dep:tokio", "dep:serde_json"] {
            assert!(cli.iter().any(|d| d.as_str() == Some(dep)), "{} not in cli", dep);
        }
        assert!(manifest["profile"]["release"]["lto"].as_bool().unwrap());
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        // Git checkouts embed the short hash; source tarballs do not
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(
                ver.contains('+'),
                "With GIT_HASH set, version should contain '+', got: {}",
                ver
            );
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(
                hash_part.len(),
                7,
                "Git hash should be 7 chars, got: {}",
                hash_part
            );
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
