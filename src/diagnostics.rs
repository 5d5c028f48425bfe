//! Pipeline counters.
//!
//! Lock-free counters sampled from the frame loop and the session. Sampling
//! is gated on `enabled` so the hot path costs one relaxed load when
//! diagnostics are off. Disabling never clears; `reset` does.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Smoothing factor of the frame-interval moving average, in percent.
const INTERVAL_EMA_PCT: u64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub enabled: bool,
    pub frames_delivered: u64,
    /// Stale, replaced and hidden-drop frames combined.
    pub frames_dropped: u64,
    pub frames_skipped_hidden: u64,
    pub frames_skipped_busy: u64,
    pub loop_ticks: u64,
    pub avg_frame_interval_ms: f64,
    pub last_error: Option<String>,
}

pub struct DiagnosticsRecorder {
    enabled: AtomicBool,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    frames_skipped_hidden: AtomicU64,
    frames_skipped_busy: AtomicU64,
    loop_ticks: AtomicU64,
    /// Exponential moving average of the delivery interval, microseconds.
    avg_interval_us: AtomicU64,
    last_delivery: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
}

impl DiagnosticsRecorder {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            frames_delivered: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_skipped_hidden: AtomicU64::new(0),
            frames_skipped_busy: AtomicU64::new(0),
            loop_ticks: AtomicU64::new(0),
            avg_interval_us: AtomicU64::new(0),
            last_delivery: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        if self.is_enabled() {
            self.loop_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delivered(&self) {
        if !self.is_enabled() {
            return;
        }
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut last = self.last_delivery.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = last.replace(now) {
            let sample = now.duration_since(prev).as_micros() as u64;
            let old = self.avg_interval_us.load(Ordering::Relaxed);
            let next = if old == 0 {
                sample
            } else {
                (old * (100 - INTERVAL_EMA_PCT) + sample * INTERVAL_EMA_PCT) / 100
            };
            self.avg_interval_us.store(next, Ordering::Relaxed);
        }
    }

    pub fn record_dropped(&self) {
        if self.is_enabled() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped_hidden(&self) {
        if self.is_enabled() {
            self.frames_skipped_hidden.fetch_add(1, Ordering::Relaxed);
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped_busy(&self) {
        if self.is_enabled() {
            self.frames_skipped_busy.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Always recorded, even when counter sampling is off.
    pub fn record_error(&self, message: &str) {
        let mut last = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(message.to_owned());
    }

    pub fn reset(&self) {
        self.frames_delivered.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.frames_skipped_hidden.store(0, Ordering::Relaxed);
        self.frames_skipped_busy.store(0, Ordering::Relaxed);
        self.loop_ticks.store(0, Ordering::Relaxed);
        self.avg_interval_us.store(0, Ordering::Relaxed);
        *self.last_delivery.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            enabled: self.is_enabled(),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_skipped_hidden: self.frames_skipped_hidden.load(Ordering::Relaxed),
            frames_skipped_busy: self.frames_skipped_busy.load(Ordering::Relaxed),
            loop_ticks: self.loop_ticks.load(Ordering::Relaxed),
            avg_frame_interval_ms: self.avg_interval_us.load(Ordering::Relaxed) as f64
                / 1000.0,
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

impl Default for DiagnosticsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_recorder_samples_nothing() {
        let d = DiagnosticsRecorder::new();
        d.record_tick();
        d.record_delivered();
        d.record_dropped();
        let snap = d.snapshot();
        assert_eq!(snap.loop_ticks, 0);
        assert_eq!(snap.frames_delivered, 0);
        assert_eq!(snap.frames_dropped, 0);
    }

    #[test]
    fn test_enabled_counters_and_hidden_skip_counts_as_drop() {
        let d = DiagnosticsRecorder::new();
        d.set_enabled(true);
        d.record_tick();
        d.record_tick();
        d.record_delivered();
        d.record_skipped_hidden();
        d.record_skipped_busy();
        let snap = d.snapshot();
        assert_eq!(snap.loop_ticks, 2);
        assert_eq!(snap.frames_delivered, 1);
        assert_eq!(snap.frames_skipped_hidden, 1);
        assert_eq!(snap.frames_skipped_busy, 1);
        assert_eq!(snap.frames_dropped, 1);
    }

    #[test]
    fn test_disable_keeps_counts_reset_clears() {
        let d = DiagnosticsRecorder::new();
        d.set_enabled(true);
        d.record_delivered();
        d.set_enabled(false);
        assert_eq!(d.snapshot().frames_delivered, 1);
        d.record_delivered(); // ignored while disabled
        assert_eq!(d.snapshot().frames_delivered, 1);
        d.reset();
        assert_eq!(d.snapshot().frames_delivered, 0);
    }

    #[test]
    fn test_last_error_survives_disabled_sampling() {
        let d = DiagnosticsRecorder::new();
        d.record_error("engine fault");
        assert_eq!(d.snapshot().last_error.as_deref(), Some("engine fault"));
        d.reset();
        assert!(d.snapshot().last_error.is_none());
    }
}
