//! PCM16 conversion and the base64 wire encoding used by the realtime protocol.

use crate::{Result, TutorError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Gain applied to the mean amplitude before clamping to [0, 1].
const LEVEL_GAIN: f32 = 5.0;

pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
        .collect()
}

pub fn encode_base64_pcm16(samples: &[f32]) -> String {
    STANDARD.encode(f32_to_pcm16(samples))
}

pub fn decode_base64_pcm16(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| TutorError::ProtocolError(format!("Invalid audio payload: {}", e)))?;
    if bytes.len() % 2 != 0 {
        return Err(TutorError::ProtocolError(format!(
            "Audio payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(pcm16_to_f32(&bytes))
}

/// Loudness in [0, 1] for the character's mouth animation.
pub fn audio_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32;
    (mean * LEVEL_GAIN).clamp(0.0, 1.0)
}
