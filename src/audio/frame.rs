use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which way a frame travels through the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Capture,
    Playback,
}

/// Fixed-duration mono PCM block.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub seq: u64,
    pub direction: Direction,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(seq: u64, direction: Direction, samples: Vec<f32>) -> Self {
        Self {
            seq,
            direction,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / sample_rate as f64)
    }

    /// Mean absolute amplitude.
    pub fn level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.abs()).sum::<f32>() / self.samples.len() as f32
    }
}

/// Hands out monotonically increasing sequence numbers for one direction.
#[derive(Debug)]
pub struct FrameSequencer {
    direction: Direction,
    next: u64,
}

impl FrameSequencer {
    pub fn new(direction: Direction) -> Self {
        Self { direction, next: 0 }
    }

    pub fn frame(&mut self, samples: Vec<f32>) -> AudioFrame {
        let frame = AudioFrame::new(self.next, self.direction, samples);
        self.next += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_level() {
        let frame = AudioFrame::new(0, Direction::Capture, vec![0.5, -0.5, 0.0, 0.0]);
        assert_eq!(frame.duration(4), Duration::from_secs(1));
        assert!((frame.level() - 0.25).abs() < 1e-6);
        assert_eq!(frame.duration(0), Duration::ZERO);
    }

    #[test]
    fn test_sequencer_is_monotonic() {
        let mut seq = FrameSequencer::new(Direction::Playback);
        let a = seq.frame(vec![0.0; 4]);
        let b = seq.frame(vec![0.0; 4]);
        assert_eq!((a.seq, b.seq), (0, 1));
        assert_eq!(b.direction, Direction::Playback);
    }
}
