//! 16-bit PCM conversion and base64 framing for the streaming endpoint.
//!
//! Uplink frames are little-endian i16 samples, base64-encoded and tagged
//! with an `audio/pcm;rate=N` mime type. Downlink chunks use the same byte
//! layout at the playback rate.

use crate::defaults;
use crate::error::{ConciergeError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

/// Encoded audio ready for `send_realtime_input`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmBlob {
    /// Base64 of little-endian i16 samples.
    pub data: String,
    pub mime_type: String,
}

impl PcmBlob {
    /// Number of samples carried by this blob.
    pub fn sample_count(&self) -> usize {
        // 4 base64 chars encode 3 bytes; padding chars carry no data.
        let padding = self.data.bytes().rev().take_while(|&b| b == b'=').count();
        let bytes = (self.data.len() / 4 * 3).saturating_sub(padding.min(2));
        bytes / 2
    }
}

/// Mime descriptor for raw PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{}{}", defaults::PCM_MIME_PREFIX, sample_rate)
}

/// Convert a float sample in [-1.0, 1.0] to i16 using `round(sample * 32767)`.
///
/// Out-of-range input is clamped; NaN maps to silence.
pub fn float_to_pcm16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Normalize an i16 sample to [-1.0, 1.0).
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode one capture frame into the outbound wire format.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> PcmBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&float_to_pcm16(s).to_le_bytes());
    }
    PcmBlob {
        data: B64.encode(&bytes),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode an inbound base64 chunk into normalized float samples.
///
/// # Errors
/// Returns `ConciergeError::AudioDecode` for invalid base64 or a byte count
/// that is not a whole number of 16-bit samples.
pub fn decode_chunk(data: &str) -> Result<Vec<f32>> {
    let bytes = B64.decode(data).map_err(|e| ConciergeError::AudioDecode {
        message: format!("invalid base64: {}", e),
    })?;
    if bytes.len() % 2 != 0 {
        return Err(ConciergeError::AudioDecode {
            message: format!("{} bytes is not a whole number of 16-bit samples", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Parse the rate out of an `audio/pcm;rate=N` mime type.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("rate="))
        .and_then(|rate| rate.parse().ok())
}

/// Linear-interpolation resampler. A zero rate yields no samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len =
        (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

/// Mix interleaved multi-channel audio down to mono by averaging channels.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
