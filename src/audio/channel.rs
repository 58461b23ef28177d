//! Bounded frame queue between a hardware callback thread and an async consumer.
//!
//! `push` never blocks and never allocates beyond the fixed ring. When the ring is
//! full the configured [`DropPolicy`] decides which frame is discarded, and the
//! drop is counted instead of reported as an error. `pull` suspends the calling
//! task until a frame arrives or the channel is closed.

use super::frame::AudioFrame;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

const DROP_LOG_EVERY: u64 = 50;

/// Which frame to discard when the channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Evict the oldest queued frame to make room (capture).
    DropOldest,
    /// Reject the incoming frame (playback).
    DropNewest,
}

/// Result of a single `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest frame.
    Evicted,
    /// The incoming frame was discarded.
    Rejected,
    Closed,
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    pub pushed: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub flushed: u64,
    pub queued: usize,
    pub capacity: usize,
}

struct ChannelInner {
    ring: Mutex<HeapRb<AudioFrame>>,
    ready: Notify,
    closed: AtomicBool,
    policy: DropPolicy,
    capacity: usize,
    name: &'static str,
    pushed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
}

/// Fixed-capacity audio frame queue. Clones share the same ring.
#[derive(Clone)]
pub struct BoundedAudioChannel {
    inner: Arc<ChannelInner>,
}

impl BoundedAudioChannel {
    /// Create a channel holding at most `capacity` frames (minimum 1).
    pub fn new(name: &'static str, capacity: usize, policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(ChannelInner {
                ring: Mutex::new(HeapRb::new(capacity)),
                ready: Notify::new(),
                closed: AtomicBool::new(false),
                policy,
                capacity,
                name,
                pushed: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                flushed: AtomicU64::new(0),
            }),
        }
    }

    /// Queue a frame without blocking. Safe to call from a hardware callback.
    pub fn push(&self, frame: AudioFrame) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        let outcome = {
            let mut ring = self.inner.ring.lock();
            match ring.try_push(frame) {
                Ok(()) => PushOutcome::Queued,
                Err(frame) => match self.inner.policy {
                    DropPolicy::DropOldest => {
                        let _ = ring.try_pop();
                        let _ = ring.try_push(frame);
                        PushOutcome::Evicted
                    }
                    DropPolicy::DropNewest => PushOutcome::Rejected,
                },
            }
        };

        self.inner.pushed.fetch_add(1, Ordering::Relaxed);
        if matches!(outcome, PushOutcome::Evicted | PushOutcome::Rejected) {
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % DROP_LOG_EVERY == 1 {
                warn!(channel = self.inner.name, dropped, "audio channel full, dropping frames");
            }
        }
        if outcome != PushOutcome::Rejected {
            self.inner.ready.notify_one();
        }
        outcome
    }

    /// Take the next frame if one is queued.
    pub fn try_pull(&self) -> Option<AudioFrame> {
        let frame = self.inner.ring.lock().try_pop();
        if frame.is_some() {
            self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Wait for the next frame. Returns `None` once the channel is closed and drained.
    pub async fn pull(&self) -> Option<AudioFrame> {
        loop {
            if let Some(frame) = self.try_pull() {
                return Some(frame);
            }
            if self.is_closed() {
                return self.try_pull();
            }
            self.inner.ready.notified().await;
        }
    }

    /// Discard everything queued. Returns the number of discarded frames.
    pub fn flush(&self) -> usize {
        let discarded = self.inner.ring.lock().clear();
        if discarded > 0 {
            self.inner
                .flushed
                .fetch_add(discarded as u64, Ordering::Relaxed);
            debug!(channel = self.inner.name, discarded, "flushed audio channel");
        }
        discarded
    }

    /// Stop accepting frames and wake any waiting consumer.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(channel = self.inner.name, "audio channel closed");
        }
        self.inner.ready.notify_waiters();
        self.inner.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.ring.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.ring.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            pushed: self.inner.pushed.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.dropped(),
            flushed: self.inner.flushed.load(Ordering::Relaxed),
            queued: self.len(),
            capacity: self.inner.capacity,
        }
    }
}

impl std::fmt::Debug for BoundedAudioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedAudioChannel")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("stats", &self.stats())
            .finish()
    }
}
