//! Decoder engine seam.
//!
//! Everything above this trait treats the decoder as an opaque async device:
//! commands in, property pushes and frames out. Engines run out of process or
//! in process; the bridge never cares which.

pub mod software;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::BridgeResult;

pub use software::SoftwareEngine;

/// Callback an engine attaches to a frame so the shared slot can hand the
/// backing texture back once the consumer is done with it.
pub type FrameReleaser = Arc<dyn Fn(Bytes) + Send + Sync>;

/// One decoded frame, carrying an opaque shared-texture handle.
///
/// The handle is never interpreted by the bridge. Ownership of the texture
/// stays with the engine; `release` returns it.
#[derive(Clone)]
pub struct EngineFrame {
    pub handle: Bytes,
    pub pts_sec: f64,
    pub release: FrameReleaser,
}

impl fmt::Debug for EngineFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineFrame")
            .field("handle_len", &self.handle.len())
            .field("pts_sec", &self.pts_sec)
            .finish()
    }
}

/// Events surfaced by [`MediaEngine::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// An observed property changed. `value` is `Value::Null` when the
    /// property became unavailable.
    PropertyChange { name: String, value: Value },
    /// A new file finished opening and is ready to decode.
    FileLoaded,
    /// Playback reached the end of the current file.
    EndOfFile,
    /// The engine hit an unrecoverable fault. After this the engine only
    /// answers shutdown.
    Fatal { message: String },
}

/// Async decoder engine driven by the playback session.
///
/// All methods may be called from the session task and the frame loop task
/// concurrently; implementations synchronize internally.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Stable backend identifier, reported by the probe.
    fn name(&self) -> &'static str;

    /// Whether `resize_surface` can reuse the existing surface allocation.
    /// When false the session tears the surface down and re-initializes.
    fn supports_in_place_resize(&self) -> bool;

    /// Allocate the render surface at the given size.
    async fn init_surface(&self, width: u32, height: u32) -> BridgeResult<()>;

    /// Resize the already-initialized surface in place.
    async fn resize_surface(&self, width: u32, height: u32) -> BridgeResult<()>;

    /// Begin loading a media source. Completion is signaled later through
    /// [`EngineEvent::FileLoaded`].
    async fn load(&self, source: &str) -> BridgeResult<()>;

    /// Run one engine command, e.g. `["seek", "30", "absolute"]`.
    async fn command(&self, args: &[String]) -> BridgeResult<Value>;

    async fn get_property(&self, name: &str) -> BridgeResult<Value>;

    async fn set_property(&self, name: &str, value: Value) -> BridgeResult<()>;

    /// Subscribe to change events for a property. Observing twice is a no-op.
    async fn observe_property(&self, name: &str) -> BridgeResult<()>;

    async fn unobserve_property(&self, name: &str) -> BridgeResult<()>;

    /// Cheap non-blocking check used by the frame loop to decide whether an
    /// `acquire_frame` round trip is worth making.
    fn has_frame_ready(&self) -> bool;

    /// Last unrecoverable engine fault, if any. Non-consuming; the frame
    /// loop polls it every tick so a dead decoder faults the loop even while
    /// no frame is ready.
    fn fatal_error(&self) -> Option<String> {
        None
    }

    /// Take the newest decoded frame, or `None` when nothing new arrived
    /// since the last acquire.
    async fn acquire_frame(&self) -> BridgeResult<Option<EngineFrame>>;

    /// Drain pending engine events. Never blocks waiting for new ones.
    async fn poll_events(&self) -> Vec<EngineEvent>;

    /// Stop decoding and free engine resources. Idempotent.
    async fn shutdown(&self);
}
