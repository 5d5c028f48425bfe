//! Render surface lifecycle.
//!
//! The surface is the shared texture allocation the engine decodes into. Every
//! size change bumps a generation counter; frames pulled under an older
//! generation are stale and get dropped instead of presented.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::engine::MediaEngine;
use crate::error::{BridgeError, BridgeResult};

/// Smallest dimension the engine side accepts. Requests below this are
/// clamped, not rejected, so a collapsing window never kills the surface.
pub const MIN_SURFACE_DIM: u32 = 16;

/// Pixel layout of the shared texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra8,
}

/// Current surface description, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub generation: u64,
}

/// Owns the surface state for one session and drives the engine's surface
/// calls. Not itself thread safe; the session serializes access.
pub struct SurfaceManager {
    engine: Arc<dyn MediaEngine>,
    size: Option<(u32, u32)>,
    generation: Arc<AtomicU64>,
}

impl SurfaceManager {
    /// `generation` is shared with the frame loop, which tags frames with it.
    pub fn new(engine: Arc<dyn MediaEngine>, generation: Arc<AtomicU64>) -> Self {
        Self {
            engine,
            size: None,
            generation,
        }
    }

    pub fn info(&self) -> Option<SurfaceInfo> {
        self.size.map(|(width, height)| SurfaceInfo {
            width,
            height,
            format: PixelFormat::Bgra8,
            generation: self.generation.load(Ordering::Acquire),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.size.is_some()
    }

    fn clamp(width: u32, height: u32) -> BridgeResult<(u32, u32)> {
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidSize { width, height });
        }
        Ok((width.max(MIN_SURFACE_DIM), height.max(MIN_SURFACE_DIM)))
    }

    /// Allocate the surface. Fails if one already exists.
    pub async fn init(&mut self, width: u32, height: u32) -> BridgeResult<SurfaceInfo> {
        if self.size.is_some() {
            return Err(BridgeError::SurfaceInitFailed {
                reason: "surface already initialized".into(),
            });
        }
        let (w, h) = Self::clamp(width, height)?;
        self.engine.init_surface(w, h).await?;
        self.size = Some((w, h));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("surface initialized {w}x{h} (gen {generation})");
        Ok(SurfaceInfo {
            width: w,
            height: h,
            format: PixelFormat::Bgra8,
            generation,
        })
    }

    /// Resize the surface. In-place when the engine supports it, otherwise a
    /// full teardown and re-init. Either path bumps the generation, so frames
    /// decoded at the old size never reach the consumer.
    pub async fn resize(&mut self, width: u32, height: u32) -> BridgeResult<SurfaceInfo> {
        let Some((cur_w, cur_h)) = self.size else {
            return Err(BridgeError::NotInitialized);
        };
        let (w, h) = Self::clamp(width, height)?;
        if (w, h) == (cur_w, cur_h) {
            debug!("resize to current size {w}x{h}, no-op");
            // Still a fresh generation: the caller reallocated its import.
            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            return Ok(SurfaceInfo {
                width: w,
                height: h,
                format: PixelFormat::Bgra8,
                generation,
            });
        }
        if self.engine.supports_in_place_resize() {
            self.engine.resize_surface(w, h).await?;
        } else {
            // Engines without in-place resize reallocate on a fresh init.
            self.engine.init_surface(w, h).await?;
        }
        self.size = Some((w, h));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("surface resized {cur_w}x{cur_h} -> {w}x{h} (gen {generation})");
        Ok(SurfaceInfo {
            width: w,
            height: h,
            format: PixelFormat::Bgra8,
            generation,
        })
    }
}
