use super::channel::{BoundedAudioChannel, DropPolicy, PushOutcome};
use super::device::DeviceThread;
use super::frame::{Direction, FrameSequencer};
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "audio-io")]
use super::output::{spawn_playback, PlaybackParams};
#[cfg(feature = "audio-io")]
use crate::TutorError;
#[cfg(feature = "audio-io")]
use tokio::sync::mpsc::UnboundedSender;

/// Owns the speaker stream and the playback channel that feeds it.
#[derive(Debug)]
pub struct AudioSink {
    channel: BoundedAudioChannel,
    flush_generation: Arc<AtomicU64>,
    sequencer: FrameSequencer,
    device: Option<DeviceThread>,
}

impl AudioSink {
    pub fn detached(capacity: usize) -> Self {
        Self {
            channel: BoundedAudioChannel::new("playback", capacity, DropPolicy::DropNewest),
            flush_generation: Arc::new(AtomicU64::new(0)),
            sequencer: FrameSequencer::new(Direction::Playback),
            device: None,
        }
    }

    #[cfg(feature = "audio-io")]
    pub fn open(
        params: PlaybackParams,
        capacity: usize,
        errors: UnboundedSender<TutorError>,
    ) -> Result<Self> {
        let mut sink = Self::detached(capacity);
        let device = spawn_playback(
            params,
            sink.channel.clone(),
            Arc::clone(&sink.flush_generation),
            errors,
        )?;
        sink.device = Some(device);
        Ok(sink)
    }

    /// Queue decoded model audio for playback.
    pub fn play(&mut self, samples: Vec<f32>) -> PushOutcome {
        let frame = self.sequencer.frame(samples);
        self.channel.push(frame)
    }

    /// Discard pending audio, including the frame the device is currently playing.
    pub fn flush(&self) -> usize {
        self.flush_generation.fetch_add(1, Ordering::AcqRel);
        self.channel.flush()
    }

    pub fn channel(&self) -> &BoundedAudioChannel {
        &self.channel
    }

    pub fn is_hardware(&self) -> bool {
        self.device.is_some()
    }

    /// Let queued audio play out for at most `drain`, then release the device.
    pub fn stop(&mut self, drain: Duration) -> Result<()> {
        if let Some(mut device) = self.device.take() {
            device.stop(drain);
        }
        self.channel.close();
        info!(stats = ?self.channel.stats(), "audio sink stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_assigns_sequence_numbers() {
        let mut sink = AudioSink::detached(8);
        sink.play(vec![0.0; 4]);
        sink.play(vec![0.0; 4]);
        let first = sink.channel().try_pull().unwrap();
        let second = sink.channel().try_pull().unwrap();
        assert_eq!((first.seq, second.seq), (0, 1));
        assert_eq!(first.direction, Direction::Playback);
    }

    #[test]
    fn test_flush_empties_queue() {
        let mut sink = AudioSink::detached(8);
        for _ in 0..3 {
            sink.play(vec![0.2; 4]);
        }
        assert_eq!(sink.flush(), 3);
        assert!(sink.channel().is_empty());
    }

    #[test]
    fn test_full_sink_rejects_new_audio() {
        let mut sink = AudioSink::detached(2);
        sink.play(vec![0.0; 4]);
        sink.play(vec![0.0; 4]);
        assert_eq!(sink.play(vec![0.0; 4]), PushOutcome::Rejected);
        assert_eq!(sink.channel().dropped(), 1);
    }
}
