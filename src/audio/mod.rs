//! Audio: PCM codec, platform seams, uplink capture and downlink playback.

pub mod backend;
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;
pub mod mixer;
pub mod pcm;
pub mod playback;
