//! Error types for concierge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConciergeError {
    // Session errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Failed to connect to voice service: {message}")]
    ConnectFailure { message: String },

    #[error("Voice service error: {message}")]
    Transport { message: String },

    #[error("Voice service closed the connection")]
    RemoteClose,

    #[error("Cannot {action} while session is {state}")]
    InvalidTransition { state: String, action: String },

    // Audio errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    #[error("Invalid audio chunk: {message}")]
    AudioDecode { message: String },

    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ConciergeError {
    /// Short human-readable message suitable for the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            ConciergeError::PermissionDenied { .. } => {
                "Microphone access was denied. Allow microphone access and try again.".to_string()
            }
            ConciergeError::ConnectFailure { .. } => {
                "Could not reach the voice service. Please try again.".to_string()
            }
            ConciergeError::Transport { .. } | ConciergeError::RemoteClose => {
                "The voice session ended unexpectedly.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConciergeError>;
