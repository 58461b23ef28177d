use crate::{Result, TutorError};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use tracing::debug;

/// Write mono samples as a 16-bit PCM WAV file.
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec).map_err(|e| {
        TutorError::PersistenceError(format!("Failed to create WAV writer: {}", e))
    })?;

    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .map_err(|e| TutorError::PersistenceError(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| TutorError::PersistenceError(format!("Failed to finalize WAV file: {}", e)))?;

    debug!("Wrote {} samples to {:?}", samples.len(), path.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    #[test]
    fn test_write_wav_header_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..2400)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 24_000.0).sin() * 0.5)
            .collect();

        write_wav(&path, &samples, 24_000).unwrap();

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 2400);
    }
}
