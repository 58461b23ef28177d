use crate::messages::UiMessage;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::warn;

/// Messages a slow consumer may lose. Everything else is always delivered.
fn is_lossy(message: &UiMessage) -> bool {
    matches!(message, UiMessage::AudioLevel { .. })
}

/// Non-blocking sender for the UI stream.
///
/// Audio levels are capped at `capacity` undelivered messages and dropped
/// beyond that. Lifecycle, transcript, score and feedback messages are never
/// dropped, and the stream keeps send order.
#[derive(Debug, Clone)]
pub struct UiSender {
    tx: UnboundedSender<UiMessage>,
    pending_lossy: Arc<AtomicUsize>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl UiSender {
    pub fn send(&self, message: UiMessage) {
        let lossy = is_lossy(&message);
        if lossy {
            let reserved = self
                .pending_lossy
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.capacity).then_some(n + 1)
                })
                .is_ok();
            if !reserved {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 50 == 0 {
                    warn!(dropped, kind = message.kind(), "UI consumer behind, dropping message");
                }
                return;
            }
        }
        // A closed receiver means nobody is listening any more
        if self.tx.send(message).is_err() && lossy {
            self.pending_lossy.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving end of the UI stream.
#[derive(Debug)]
pub struct UiReceiver {
    rx: UnboundedReceiver<UiMessage>,
    pending_lossy: Arc<AtomicUsize>,
}

impl UiReceiver {
    pub async fn recv(&mut self) -> Option<UiMessage> {
        let message = self.rx.recv().await?;
        Some(self.release(message))
    }

    pub fn try_recv(&mut self) -> Result<UiMessage, TryRecvError> {
        self.rx.try_recv().map(|m| self.release(m))
    }

    fn release(&self, message: UiMessage) -> UiMessage {
        if is_lossy(&message) {
            self.pending_lossy.fetch_sub(1, Ordering::AcqRel);
        }
        message
    }
}

pub fn ui_channel(capacity: usize) -> (UiSender, UiReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending_lossy = Arc::new(AtomicUsize::new(0));
    (
        UiSender {
            tx,
            pending_lossy: pending_lossy.clone(),
            capacity: capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        UiReceiver { rx, pending_lossy },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SessionStatus;

    #[test]
    fn test_levels_beyond_capacity_drop() {
        let (tx, mut rx) = ui_channel(2);
        for level in [0.1, 0.2, 0.3] {
            tx.send(UiMessage::audio_level(level));
        }
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), UiMessage::audio_level(0.1));
        assert_eq!(rx.try_recv().unwrap(), UiMessage::audio_level(0.2));
        assert!(rx.try_recv().is_err());

        // Reading frees room again
        tx.send(UiMessage::audio_level(0.4));
        assert_eq!(rx.try_recv().unwrap(), UiMessage::audio_level(0.4));
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn test_lifecycle_survives_flooded_levels() {
        let (tx, mut rx) = ui_channel(4);
        tx.send(UiMessage::AiSpeaking { speaking: true });
        for _ in 0..100 {
            tx.send(UiMessage::audio_level(0.5));
        }
        tx.send(UiMessage::AiSpeaking { speaking: false });
        tx.send(UiMessage::state(SessionStatus::Completed));
        assert_eq!(tx.dropped(), 96);

        let received: Vec<UiMessage> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(received.len(), 7);
        assert_eq!(received[0], UiMessage::AiSpeaking { speaking: true });
        assert_eq!(received[5], UiMessage::AiSpeaking { speaking: false });
        assert_eq!(received[6], UiMessage::state(SessionStatus::Completed));
    }

    #[test]
    fn test_closed_receiver_is_silent() {
        let (tx, rx) = ui_channel(1);
        drop(rx);
        tx.send(UiMessage::audio_level(0.5));
        tx.send(UiMessage::audio_level(0.5));
        assert_eq!(tx.dropped(), 0);
    }
}
