//! Embedding facade.
//!
//! `PlayerAdapter` is the surface an embedding layer programs against: plain
//! playback verbs on top of the session's property and command plumbing,
//! plus a typed event stream. One adapter wraps one session; backends plug
//! in through the engine seam.

pub mod events;
pub mod player;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::BridgeConfig;
use crate::engine::{MediaEngine, SoftwareEngine};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{Chapter, PlaybackState, Track};

pub use events::{EventHandler, PlayerEvent, Subscription};
pub use player::EnginePlayer;

/// Feature surface of the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub tracks: bool,
    pub delays: bool,
    pub transforms: bool,
    pub external_subtitles: bool,
    pub screenshots: bool,
}

impl Capabilities {
    pub fn for_backend(name: &str) -> Self {
        match name {
            // The synthetic fallback has no real demuxer or filter graph.
            "software" => Self {
                tracks: true,
                delays: true,
                transforms: true,
                external_subtitles: false,
                screenshots: false,
            },
            _ => Self {
                tracks: true,
                delays: true,
                transforms: true,
                external_subtitles: true,
                screenshots: true,
            },
        }
    }
}

/// Options accepted by [`PlayerAdapter::load`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// Resume position; a seek is issued right after the load is accepted.
    pub start_seconds: Option<f64>,
}

/// High-level playback facade. All methods resolve after the underlying
/// engine acknowledged the request, not after the effect is observable.
#[async_trait]
pub trait PlayerAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    async fn load(&self, source: &str, options: LoadOptions) -> BridgeResult<()>;
    async fn play(&self) -> BridgeResult<()>;
    async fn pause(&self) -> BridgeResult<()>;
    async fn toggle_play(&self) -> BridgeResult<()>;
    async fn stop(&self) -> BridgeResult<()>;
    async fn unload(&self) -> BridgeResult<()>;
    /// Idempotent; the adapter is unusable afterwards.
    async fn destroy(&self);

    async fn seek_to(&self, seconds: f64) -> BridgeResult<()>;
    async fn seek_by(&self, delta_seconds: f64) -> BridgeResult<()>;

    async fn get_state(&self) -> BridgeResult<PlaybackState>;
    async fn get_duration(&self) -> BridgeResult<f64>;
    async fn get_tracks(&self) -> BridgeResult<Vec<Track>>;
    async fn get_chapters(&self) -> BridgeResult<Vec<Chapter>>;

    /// `volume` is normalized `0.0..=1.0`.
    async fn set_volume(&self, volume: f64) -> BridgeResult<()>;
    async fn set_muted(&self, muted: bool) -> BridgeResult<()>;
    async fn set_speed(&self, factor: f64) -> BridgeResult<()>;

    async fn get_audio_track(&self) -> BridgeResult<Option<String>>;
    async fn set_audio_track(&self, id: Option<&str>) -> BridgeResult<()>;
    async fn cycle_audio_track(&self) -> BridgeResult<Option<String>>;
    async fn get_subtitle_track(&self) -> BridgeResult<Option<String>>;
    async fn set_subtitle_track(&self, id: Option<&str>) -> BridgeResult<()>;
    async fn cycle_subtitle_track(&self) -> BridgeResult<Option<String>>;
    async fn add_external_subtitle(&self, path: &str) -> BridgeResult<()>;

    async fn get_audio_delay(&self) -> BridgeResult<f64>;
    async fn set_audio_delay(&self, seconds: f64) -> BridgeResult<()>;
    async fn get_subtitle_delay(&self) -> BridgeResult<f64>;
    async fn set_subtitle_delay(&self, seconds: f64) -> BridgeResult<()>;

    async fn get_aspect_ratio(&self) -> BridgeResult<String>;
    async fn set_aspect_ratio(&self, aspect: &str) -> BridgeResult<()>;
    async fn get_crop(&self) -> BridgeResult<String>;
    async fn set_crop(&self, crop: &str) -> BridgeResult<()>;
    async fn reset_video_transforms(&self) -> BridgeResult<()>;

    async fn take_screenshot(&self, path: &str) -> BridgeResult<()>;

    /// Register an event handler. Handlers run synchronously in registration
    /// order; see [`events::EventEmitter`].
    fn on(&self, handler: EventHandler) -> Subscription;
}

/// Build an adapter for a named backend. Unknown names fail before any
/// resource is acquired.
pub async fn create_adapter(
    backend: &str,
    config: BridgeConfig,
) -> BridgeResult<Arc<EnginePlayer>> {
    match backend {
        "software" => {
            let engine = Arc::new(SoftwareEngine::new(config.software_frame_interval));
            create_adapter_with_engine(engine, config).await
        }
        other => Err(BridgeError::UnsupportedBackend {
            name: other.to_owned(),
        }),
    }
}

/// Build an adapter around a caller-supplied engine, the hook a native
/// backend binding uses.
pub async fn create_adapter_with_engine(
    engine: Arc<dyn MediaEngine>,
    config: BridgeConfig,
) -> BridgeResult<Arc<EnginePlayer>> {
    EnginePlayer::new(engine, config).await
}
