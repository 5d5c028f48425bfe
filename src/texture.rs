//! Shared texture hand-off.
//!
//! Single-slot channel between the frame loop and one consumer. At most one
//! frame is in flight at a time; while the consumer holds it, newer frames
//! replace each other in the pending slot so the consumer always gets the
//! freshest picture. Every frame releases its texture exactly once, on
//! whichever path retires it first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use log::trace;

use crate::engine::{EngineFrame, FrameReleaser};

/// Callback receiving delivered frames. Runs on the frame-loop task; keep it
/// short and move heavy work elsewhere.
pub type FrameConsumer = Arc<dyn Fn(Frame) + Send + Sync>;

/// A presentable frame tagged with the surface generation it was decoded
/// under. Dropping it returns the texture to the engine; `release` does the
/// same explicitly. Both paths are idempotent.
pub struct Frame {
    handle: Bytes,
    pub pts_sec: f64,
    pub generation: u64,
    slot: Option<(FrameReleaser, Arc<AtomicU64>)>,
}

impl Frame {
    fn new(source: EngineFrame, generation: u64, outstanding: Arc<AtomicU64>) -> Self {
        outstanding.fetch_add(1, Ordering::AcqRel);
        Self {
            handle: source.handle,
            pts_sec: source.pts_sec,
            generation,
            slot: Some((source.release, outstanding)),
        }
    }

    /// Opaque shared-texture handle. Never interpreted by the bridge.
    pub fn handle(&self) -> &Bytes {
        &self.handle
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some((releaser, outstanding)) = self.slot.take() {
            releaser(self.handle.clone());
            outstanding.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("pts_sec", &self.pts_sec)
            .field("generation", &self.generation)
            .field("released", &self.slot.is_none())
            .finish()
    }
}

/// What happened to an offered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Handed to the consumer synchronously.
    Delivered,
    /// Consumer busy; parked in the pending slot.
    Queued,
    /// Parked, displacing (and releasing) an older pending frame.
    Replaced,
    /// No consumer registered; released immediately.
    Released,
}

/// Result of pumping the pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Empty,
    /// Consumer still holds the in-flight frame.
    Busy,
    Delivered,
    /// Pending frame predated the current surface generation; released.
    DroppedStale,
    /// No consumer; pending frame released.
    DroppedNoConsumer,
}

struct ChannelState {
    consumer: Option<FrameConsumer>,
    pending: Option<Frame>,
}

/// See module docs.
pub struct SharedTextureChannel {
    state: Mutex<ChannelState>,
    outstanding: Arc<AtomicU64>,
}

impl SharedTextureChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                consumer: None,
                pending: None,
            }),
            outstanding: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_consumer(&self, consumer: FrameConsumer) {
        self.lock().consumer = Some(consumer);
    }

    pub fn clear_consumer(&self) {
        self.lock().consumer = None;
    }

    pub fn has_consumer(&self) -> bool {
        self.lock().consumer.is_some()
    }

    /// Frames created but not yet released, pending slot included.
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Wrap an engine frame and move it toward the consumer.
    pub fn offer(&self, source: EngineFrame, generation: u64) -> OfferOutcome {
        let frame = Frame::new(source, generation, Arc::clone(&self.outstanding));
        let (deliver_to, outcome) = {
            let mut state = self.lock();
            let Some(consumer) = state.consumer.clone() else {
                drop(state);
                frame.release();
                return OfferOutcome::Released;
            };
            // This frame is the sole unreleased one exactly when nothing is
            // in flight and the pending slot is empty.
            let idle = self.outstanding.load(Ordering::Acquire) == 1
                && state.pending.is_none();
            if idle {
                (Some(consumer), OfferOutcome::Delivered)
            } else {
                let displaced = state.pending.replace(frame);
                drop(state);
                match displaced {
                    Some(old) => {
                        trace!("pending frame replaced (pts {:.3})", old.pts_sec);
                        old.release();
                        return OfferOutcome::Replaced;
                    }
                    None => return OfferOutcome::Queued,
                }
            }
        };
        if let Some(consumer) = deliver_to {
            consumer(frame);
        }
        outcome
    }

    /// Move the pending frame along: drop it when stale against
    /// `current_generation`, deliver it when the consumer is free, leave it
    /// parked otherwise.
    pub fn pump(&self, current_generation: u64) -> PumpOutcome {
        let (consumer, frame) = {
            let mut state = self.lock();
            let Some(frame) = state.pending.take() else {
                return PumpOutcome::Empty;
            };
            if frame.generation != current_generation {
                drop(state);
                frame.release();
                return PumpOutcome::DroppedStale;
            }
            let Some(consumer) = state.consumer.clone() else {
                drop(state);
                frame.release();
                return PumpOutcome::DroppedNoConsumer;
            };
            // outstanding == 1 means the pending frame is the only one left.
            if self.outstanding.load(Ordering::Acquire) > 1 {
                state.pending = Some(frame);
                return PumpOutcome::Busy;
            }
            (consumer, frame)
        };
        consumer(frame);
        PumpOutcome::Delivered
    }

    /// Release the pending frame, if any. Used on stop and teardown.
    pub fn drain_pending(&self) -> bool {
        let frame = self.lock().pending.take();
        match frame {
            Some(frame) => {
                frame.release();
                true
            }
            None => false,
        }
    }
}

impl Default for SharedTextureChannel {
    fn default() -> Self {
        Self::new()
    }
}
