//! Collects copies of captured and played audio for the end-of-session recording.

use super::frame::{AudioFrame, Direction};
use crate::{Result, TutorError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

enum ArchiveMessage {
    Frame(AudioFrame),
    Finish,
}

/// Raw session audio handed to persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchivedAudio {
    pub sample_rate: u32,
    pub input: Vec<f32>,
    pub output: Vec<f32>,
    pub mixed: Vec<f32>,
}

impl ArchivedAudio {
    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }
}

/// Cloneable handle used by the session loops to feed the archiver.
#[derive(Clone)]
pub struct ArchiveTap {
    tx: mpsc::UnboundedSender<ArchiveMessage>,
}

impl ArchiveTap {
    pub fn record(&self, frame: &AudioFrame) {
        let _ = self.tx.send(ArchiveMessage::Frame(frame.clone()));
    }

    pub fn record_samples(&self, direction: Direction, samples: &[f32]) {
        let _ = self
            .tx
            .send(ArchiveMessage::Frame(AudioFrame::new(0, direction, samples.to_vec())));
    }
}

pub struct AudioArchiver {
    tx: mpsc::UnboundedSender<ArchiveMessage>,
    task: JoinHandle<ArchivedAudio>,
}

impl AudioArchiver {
    /// Spawn the archiver task on the current runtime.
    pub fn spawn(sample_rate: u32) -> (Self, ArchiveTap) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut archive = ArchivedAudio {
                sample_rate,
                ..Default::default()
            };
            while let Some(message) = rx.recv().await {
                match message {
                    ArchiveMessage::Frame(frame) => match frame.direction {
                        Direction::Capture => archive.input.extend_from_slice(&frame.samples),
                        Direction::Playback => archive.output.extend_from_slice(&frame.samples),
                    },
                    ArchiveMessage::Finish => break,
                }
            }
            archive.mixed = mix_tracks(&archive.input, &archive.output);
            debug!(
                input = archive.input.len(),
                output = archive.output.len(),
                "audio archive complete"
            );
            archive
        });
        let tap = ArchiveTap { tx: tx.clone() };
        (Self { tx, task }, tap)
    }

    /// Stop collecting and return everything recorded so far.
    pub async fn finish(self) -> Result<ArchivedAudio> {
        let _ = self.tx.send(ArchiveMessage::Finish);
        self.task
            .await
            .map_err(|e| TutorError::ChannelError(format!("Archiver task failed: {}", e)))
    }
}

/// Zero-pad the shorter track and average sample by sample.
pub fn mix_tracks(input: &[f32], output: &[f32]) -> Vec<f32> {
    let len = input.len().max(output.len());
    (0..len)
        .map(|i| {
            let a = input.get(i).copied().unwrap_or(0.0);
            let b = output.get(i).copied().unwrap_or(0.0);
            (a + b) / 2.0
        })
        .collect()
}
