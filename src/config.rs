//! Bridge configuration.
//!
//! Pacing values mirror the adaptive delay tables of the production bridge:
//! a hot loop while frames are flowing, a cheaper peek cadence while the
//! engine has nothing ready, and a heavy backoff when the presentation layer
//! is hidden or playback sits at end-of-file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default render-target size when the caller does not provide one.
pub const DEFAULT_SURFACE_WIDTH: u32 = 1920;
pub const DEFAULT_SURFACE_HEIGHT: u32 = 1080;

/// Tunable timings and defaults for a bridge session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Surface size used by `load` when the caller never called `init_gpu`.
    pub surface_width: u32,
    pub surface_height: u32,

    /// Delay between frame-loop ticks right after a successful delivery.
    pub active_frame_interval: Duration,
    /// Delay when the engine reported no frame ready.
    pub idle_frame_interval: Duration,
    /// Delay while playback is paused.
    pub paused_frame_interval: Duration,
    /// Delay while the presentation layer is hidden or playback hit EOF.
    pub hidden_frame_interval: Duration,

    /// Cadence of the engine event pump while playback is active.
    pub event_poll_interval: Duration,
    /// Event pump cadence while paused or hidden.
    pub event_poll_idle_interval: Duration,

    /// Flush window for coalesced hot properties (time/duration).
    pub hot_property_flush_interval: Duration,

    /// How long `Starting` may last before the loop faults instead of
    /// hanging.
    pub startup_timeout: Duration,
    /// Upper bound on engine teardown during `destroy()`; a hung engine must
    /// never block the caller past this.
    pub teardown_timeout: Duration,

    /// Frame cadence of the software fallback engine.
    pub software_frame_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            surface_width: DEFAULT_SURFACE_WIDTH,
            surface_height: DEFAULT_SURFACE_HEIGHT,
            active_frame_interval: Duration::from_millis(3),
            idle_frame_interval: Duration::from_millis(8),
            paused_frame_interval: Duration::from_millis(32),
            hidden_frame_interval: Duration::from_millis(100),
            event_poll_interval: Duration::from_millis(16),
            event_poll_idle_interval: Duration::from_millis(66),
            hot_property_flush_interval: Duration::from_millis(33),
            startup_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(2),
            software_frame_interval: Duration::from_millis(40),
        }
    }
}

impl BridgeConfig {
    /// Compact configuration for tests: fast cadences, short timeouts.
    pub fn fast() -> Self {
        Self {
            surface_width: 640,
            surface_height: 360,
            active_frame_interval: Duration::from_millis(1),
            idle_frame_interval: Duration::from_millis(2),
            paused_frame_interval: Duration::from_millis(5),
            hidden_frame_interval: Duration::from_millis(10),
            event_poll_interval: Duration::from_millis(4),
            event_poll_idle_interval: Duration::from_millis(10),
            hot_property_flush_interval: Duration::from_millis(10),
            startup_timeout: Duration::from_millis(1500),
            teardown_timeout: Duration::from_millis(500),
            software_frame_interval: Duration::from_millis(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_ordered() {
        let cfg = BridgeConfig::default();
        assert!(cfg.active_frame_interval < cfg.idle_frame_interval);
        assert!(cfg.idle_frame_interval < cfg.paused_frame_interval);
        assert!(cfg.paused_frame_interval < cfg.hidden_frame_interval);
        assert!(cfg.startup_timeout > cfg.hot_property_flush_interval);
    }

    #[test]
    fn test_serde_round_trip() {
        let cfg = BridgeConfig::fast();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
