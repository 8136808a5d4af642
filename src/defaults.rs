//! Default configuration constants for concierge.
//!
//! Shared by the config layer, the session and the CLI so the audio formats
//! agree on both sides of the transport.

/// Sample rate of the capture context in Hz.
///
/// The streaming endpoint expects 16kHz mono PCM uplink audio.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of inbound model audio in Hz.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per outbound capture frame (256ms at 16kHz).
pub const FRAME_SIZE: usize = 4096;

/// Hosted model identifier requested on connect.
pub const MODEL_ID: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice used for model speech.
pub const VOICE: &str = "Zephyr";

/// Persona text handed to the model as its system instruction.
pub const SYSTEM_INSTRUCTION: &str = "You are a friendly voice concierge for a small business. \
Greet the caller, find out what they need, and help them book an appointment or answer \
questions about services. Keep every reply short and conversational.";

/// Consecutive failed sends after which the transport is treated as broken.
///
/// Single failures only drop the frame; the microphone is real-time and frames
/// are never retried.
pub const MAX_CONSECUTIVE_SEND_FAILURES: u32 = 25;

/// Gain applied to audio echoed back by the loopback transport.
pub const LOOPBACK_GAIN: f32 = 1.0;

/// Lowest and highest PCM rate accepted on inbound audio.
pub const MIN_PCM_RATE: u32 = 8000;
pub const MAX_PCM_RATE: u32 = 96000;

/// Mime type prefix for raw little-endian 16-bit PCM.
pub const PCM_MIME_PREFIX: &str = "audio/pcm;rate=";
