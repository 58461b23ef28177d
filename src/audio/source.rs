use super::channel::{BoundedAudioChannel, DropPolicy};
use super::device::DeviceThread;
use crate::Result;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "audio-io")]
use super::input::{spawn_capture, CaptureParams};
#[cfg(feature = "audio-io")]
use crate::TutorError;
#[cfg(feature = "audio-io")]
use tokio::sync::mpsc::UnboundedSender;

/// Owns the microphone stream and the capture channel it feeds.
///
/// A detached source has no hardware behind it; frames are pushed into its
/// channel by whoever holds a clone of [`AudioSource::channel`].
#[derive(Debug)]
pub struct AudioSource {
    channel: BoundedAudioChannel,
    device: Option<DeviceThread>,
}

impl AudioSource {
    pub fn detached(capacity: usize) -> Self {
        Self {
            channel: BoundedAudioChannel::new("capture", capacity, DropPolicy::DropOldest),
            device: None,
        }
    }

    /// Open the input device described by `params`.
    #[cfg(feature = "audio-io")]
    pub fn open(
        params: CaptureParams,
        capacity: usize,
        errors: UnboundedSender<TutorError>,
    ) -> Result<Self> {
        let channel = BoundedAudioChannel::new("capture", capacity, DropPolicy::DropOldest);
        let device = spawn_capture(params, channel.clone(), errors)?;
        Ok(Self {
            channel,
            device: Some(device),
        })
    }

    pub fn channel(&self) -> &BoundedAudioChannel {
        &self.channel
    }

    pub fn is_hardware(&self) -> bool {
        self.device.is_some()
    }

    /// Stop the device (bounded drain) and close the channel.
    pub fn stop(&mut self, drain: Duration) -> Result<()> {
        if let Some(mut device) = self.device.take() {
            device.stop(drain);
        }
        self.channel.close();
        info!(stats = ?self.channel.stats(), "audio source stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{AudioFrame, Direction};

    #[tokio::test]
    async fn test_detached_source_delivers_pushed_frames() {
        let mut source = AudioSource::detached(4);
        assert!(!source.is_hardware());

        let producer = source.channel().clone();
        producer.push(AudioFrame::new(0, Direction::Capture, vec![0.1; 8]));
        assert_eq!(source.channel().pull().await.map(|f| f.seq), Some(0));

        source.stop(Duration::ZERO).unwrap();
        assert!(source.channel().pull().await.is_none());
    }
}
