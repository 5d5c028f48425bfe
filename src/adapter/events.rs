//! Facade event emitter.
//!
//! Handlers run synchronously in registration order. A panicking handler is
//! contained by a per-handler barrier so one bad listener never takes the
//! event task down or starves its peers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::error;

use crate::model::{Chapter, Track};

/// Events the embedding layer subscribes to.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// First frame delivered; the player is presentable.
    Ready,
    FileLoaded,
    Tracks(Vec<Track>),
    Chapters(Vec<Chapter>),
    Time { seconds: f64 },
    Duration { seconds: f64 },
    Play,
    Pause,
    /// Fires at most once per loaded file.
    Ended,
    Volume { volume: f64, muted: bool },
    Speed { factor: f64 },
    Error { message: String, fatal: bool },
}

pub type EventHandler = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

type HandlerList = Mutex<Vec<(u64, EventHandler)>>;

/// Revokes one handler registration. Dropping the subscription without
/// calling [`Subscription::unsubscribe`] leaves the handler attached for the
/// emitter's lifetime.
pub struct Subscription {
    id: u64,
    handlers: Weak<HandlerList>,
}

impl Subscription {
    /// Idempotent; a second call on the same registration is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct EventEmitter {
    handlers: Arc<HandlerList>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, handler));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Fan one event out to every handler. Handlers registered during the
    /// emit see only later events.
    pub fn emit(&self, event: &PlayerEvent) {
        let snapshot: Vec<(u64, EventHandler)> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (id, handler) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!("event handler {id} panicked on {event:?}");
            }
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let emitter = EventEmitter::new();
        let seen: Arc<StdMutex<Vec<u32>>> = Arc::new(StdMutex::new(Vec::new()));
        for tag in [1u32, 2, 3] {
            let seen = Arc::clone(&seen);
            emitter.subscribe(Arc::new(move |_| {
                seen.lock().unwrap().push(tag);
            }));
        }
        emitter.emit(&PlayerEvent::Play);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_panicking_handler_does_not_starve_peers() {
        let emitter = EventEmitter::new();
        let seen: Arc<StdMutex<u32>> = Arc::new(StdMutex::new(0));
        emitter.subscribe(Arc::new(|_| panic!("bad handler")));
        let seen_in = Arc::clone(&seen);
        emitter.subscribe(Arc::new(move |_| {
            *seen_in.lock().unwrap() += 1;
        }));
        emitter.emit(&PlayerEvent::Pause);
        emitter.emit(&PlayerEvent::Play);
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let emitter = EventEmitter::new();
        let seen: Arc<StdMutex<u32>> = Arc::new(StdMutex::new(0));
        let seen_in = Arc::clone(&seen);
        let sub = emitter.subscribe(Arc::new(move |_| {
            *seen_in.lock().unwrap() += 1;
        }));
        emitter.emit(&PlayerEvent::Play);
        sub.unsubscribe();
        sub.unsubscribe();
        emitter.emit(&PlayerEvent::Play);
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(emitter.handler_count(), 0);
    }
}
