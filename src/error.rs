//! Error taxonomy for the playback bridge.
//!
//! Validation errors (`UnknownProperty`, `InvalidPropertyValue`, `InvalidSize`)
//! are resolved locally before anything reaches the engine. Engine-originated
//! failures (`CommandFailed`, `EngineFatal`) are surfaced structured and never
//! retried automatically, since many playback commands are not idempotent.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// All failures the bridge can report to its caller.
///
/// Stale-frame drops are intentionally absent: they are expected behavior
/// during a resize and are counted in diagnostics instead of being raised.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// The requested backend name is not registered.
    #[error("unsupported backend: {name}")]
    UnsupportedBackend { name: String },

    /// A mutating call arrived after `destroy()`.
    #[error("session destroyed")]
    SessionDestroyed,

    /// An operation that requires `init_gpu` was called before it.
    #[error("session not initialized")]
    NotInitialized,

    /// The property name is not declared by the registry.
    #[error("unknown property: {name}")]
    UnknownProperty { name: String },

    /// The value's type does not match the property's declared kind.
    /// The engine is never touched in this case.
    #[error("invalid value for property `{name}`: expected {expected}, got {got}")]
    InvalidPropertyValue {
        name: String,
        expected: &'static str,
        got: String,
    },

    /// The engine rejected a dispatched command.
    #[error("command failed (code {code}): {message}")]
    CommandFailed { code: i32, message: String },

    /// The engine could not allocate or rebind the render target.
    #[error("surface init failed: {reason}")]
    SurfaceInitFailed { reason: String },

    /// Surface dimensions below the supported minimum.
    #[error("invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    /// The frame loop produced no frame within the startup window.
    #[error("frame loop start timed out")]
    FrameLoopStartTimeout,

    /// A fatal engine failure; the frame loop transitions to `Faulted` and
    /// only `destroy()` remains valid.
    #[error("engine fatal: {message}")]
    EngineFatal { message: String },

    /// Catch-all for backend-specific failures funneled through the engine
    /// seam.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BridgeError {
    /// Fatal errors poison the session: every frame-loop operation after one
    /// is rejected until `destroy()`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::EngineFatal { .. } | BridgeError::FrameLoopStartTimeout
        )
    }
}
