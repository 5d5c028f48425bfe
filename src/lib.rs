//! Embedded playback bridge.
//!
//! `framebridge` drives an out-of-process media decoder on behalf of an
//! embedding presentation layer: it owns the shared-texture surface the
//! decoder renders into, paces a frame loop that hands frames across, and
//! bridges the decoder's property and command protocol into a typed,
//! event-driven player facade.
//!
//! Layering, bottom up:
//! - [`engine`]: the async decoder contract plus the in-process software
//!   fallback backend.
//! - [`surface`], [`texture`], [`frame_loop`]: surface lifecycle with
//!   generation tagging, single-slot frame hand-off with RAII texture
//!   release, and the adaptive-pacing loop task.
//! - [`properties`], [`command`]: validated property access with coalesced
//!   change pushes, and opaque command dispatch.
//! - [`session`]: one object per player owning all of the above, one method
//!   per bridge entry point.
//! - [`adapter`]: the high-level [`adapter::PlayerAdapter`] facade with
//!   typed events.
//!
//! The crate installs no logger and spawns tasks only on the caller's tokio
//! runtime.

pub mod adapter;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod frame_loop;
pub mod model;
pub mod properties;
pub mod session;
pub mod surface;
pub mod texture;

pub use adapter::{
    Capabilities, EnginePlayer, LoadOptions, PlayerAdapter, PlayerEvent, Subscription,
    create_adapter, create_adapter_with_engine,
};
pub use config::BridgeConfig;
pub use diagnostics::DiagnosticsSnapshot;
pub use engine::{EngineEvent, EngineFrame, MediaEngine, SoftwareEngine};
pub use error::{BridgeError, BridgeResult};
pub use frame_loop::LoopState;
pub use model::{Chapter, PlaybackState, Track, TrackKind};
pub use properties::{ObserveHandle, PropertyValue};
pub use session::{PlayerSession, ProbeReport, SessionEvent};
pub use surface::{PixelFormat, SurfaceInfo};
pub use texture::Frame;
