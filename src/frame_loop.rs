//! Frame loop controller.
//!
//! One tokio task pulls frames from the engine and hands them to the shared
//! texture channel. The loop owns no policy about frame contents; it decides
//! only when to pull, which generation a frame belongs to, and how long to
//! sleep until the next tick. Pacing adapts to presentation and playback
//! flags so a hidden or idle player costs close to nothing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::diagnostics::DiagnosticsRecorder;
use crate::engine::MediaEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::texture::{OfferOutcome, PumpOutcome, SharedTextureChannel};

/// Lifecycle of the frame loop task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Stopping,
    Faulted,
}

impl LoopState {
    /// Legal lifecycle edges. `Faulted -> Idle` is reserved for teardown.
    pub fn can_transition_to(self, next: LoopState) -> bool {
        match (self, next) {
            (LoopState::Idle, LoopState::Starting) => true,
            (LoopState::Starting, LoopState::Running) => true,
            (LoopState::Starting, LoopState::Stopping) => true,
            (LoopState::Starting, LoopState::Faulted) => true,
            (LoopState::Running, LoopState::Stopping) => true,
            (LoopState::Running, LoopState::Faulted) => true,
            (LoopState::Stopping, LoopState::Idle) => true,
            (LoopState::Stopping, LoopState::Faulted) => true,
            (LoopState::Faulted, LoopState::Idle) => true,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, LoopState::Starting | LoopState::Running)
    }
}

/// Tick pacing derived from the bridge config.
#[derive(Debug, Clone, Copy)]
struct Pacing {
    active: Duration,
    idle: Duration,
    paused: Duration,
    hidden: Duration,
    startup_timeout: Duration,
    teardown_timeout: Duration,
}

impl Pacing {
    fn from_config(config: &BridgeConfig) -> Self {
        Self {
            active: config.active_frame_interval,
            idle: config.idle_frame_interval,
            paused: config.paused_frame_interval,
            hidden: config.hidden_frame_interval,
            startup_timeout: config.startup_timeout,
            teardown_timeout: config.teardown_timeout,
        }
    }
}

/// State shared between the controller handle and the loop task.
struct LoopShared {
    engine: Arc<dyn MediaEngine>,
    channel: Arc<SharedTextureChannel>,
    diagnostics: Arc<DiagnosticsRecorder>,
    /// Current surface generation; frames are tagged with its value at pull
    /// time. Bumped by the surface manager.
    generation: Arc<AtomicU64>,
    state: watch::Sender<LoopState>,
    fault: Mutex<Option<String>>,
    presentation_active: AtomicBool,
    playback_paused: AtomicBool,
    playback_eof: AtomicBool,
    force_present_once: AtomicBool,
    pacing: Pacing,
}

impl LoopShared {
    fn try_transition(&self, next: LoopState) -> bool {
        let mut moved = false;
        self.state.send_modify(|state| {
            if state.can_transition_to(next) {
                *state = next;
                moved = true;
            }
        });
        if moved {
            debug!("frame loop -> {next:?}");
        }
        moved
    }

    fn fault(&self, message: String) {
        error!("frame loop fault: {message}");
        self.diagnostics.record_error(&message);
        *self.fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
        self.try_transition(LoopState::Faulted);
        self.channel.drain_pending();
    }

    fn tick_delay(&self, had_frame: bool) -> Duration {
        if !self.presentation_active.load(Ordering::Acquire)
            || self.playback_eof.load(Ordering::Acquire)
        {
            return self.pacing.hidden;
        }
        if self.playback_paused.load(Ordering::Acquire) {
            return self.pacing.paused;
        }
        if had_frame {
            self.pacing.active
        } else {
            self.pacing.idle
        }
    }
}

/// Owns the loop task and validates every lifecycle call against
/// [`LoopState`].
pub struct FrameLoopController {
    shared: Arc<LoopShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
}

impl FrameLoopController {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        channel: Arc<SharedTextureChannel>,
        diagnostics: Arc<DiagnosticsRecorder>,
        generation: Arc<AtomicU64>,
        config: &BridgeConfig,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            shared: Arc::new(LoopShared {
                engine,
                channel,
                diagnostics,
                generation,
                state,
                fault: Mutex::new(None),
                presentation_active: AtomicBool::new(true),
                playback_paused: AtomicBool::new(true),
                playback_eof: AtomicBool::new(false),
                force_present_once: AtomicBool::new(false),
                pacing: Pacing::from_config(config),
            }),
            task: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel_token(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> LoopState {
        *self.shared.state.borrow()
    }

    /// Watch lifecycle changes; used by the session to surface faults and
    /// readiness.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.shared.state.subscribe()
    }

    pub fn last_fault(&self) -> Option<String> {
        self.shared
            .fault
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Start the loop. Re-entrant while starting or running; rejected from
    /// `Faulted` until teardown resets the controller.
    pub fn start(&self) -> BridgeResult<LoopState> {
        let current = self.state();
        match current {
            LoopState::Starting | LoopState::Running => return Ok(current),
            LoopState::Faulted => {
                let message = self
                    .last_fault()
                    .unwrap_or_else(|| "frame loop faulted".into());
                return Err(BridgeError::EngineFatal { message });
            }
            LoopState::Stopping => {
                return Err(BridgeError::Internal(anyhow::anyhow!(
                    "frame loop is stopping"
                )));
            }
            LoopState::Idle => {}
        }
        if !self.shared.try_transition(LoopState::Starting) {
            return Ok(self.state());
        }
        let token = CancellationToken::new();
        *self.cancel_token() = token.clone();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_loop(shared, token));
        *self.task_slot() = Some(handle);
        info!("frame loop started");
        Ok(LoopState::Starting)
    }

    /// Stop the loop and release the pending frame. Safe from every state;
    /// a faulted loop stays faulted so the error remains inspectable.
    pub async fn stop(&self) {
        let current = self.state();
        if current == LoopState::Idle {
            return;
        }
        if current.is_active() {
            self.shared.try_transition(LoopState::Stopping);
        }
        self.cancel_token().cancel();
        let handle = self.task_slot().take();
        if let Some(mut handle) = handle {
            let grace = self.shared.pacing.teardown_timeout;
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("frame loop task did not stop within {grace:?}, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        self.shared.channel.drain_pending();
        if self.state() == LoopState::Stopping {
            self.shared.try_transition(LoopState::Idle);
        }
        info!("frame loop stopped ({:?})", self.state());
    }

    /// Teardown-only reset: cancels whatever runs and forces `Idle`, the one
    /// exit from `Faulted`.
    pub async fn reset(&self) {
        self.cancel_token().cancel();
        let handle = self.task_slot().take();
        if let Some(mut handle) = handle {
            let grace = self.shared.pacing.teardown_timeout;
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }
        self.shared.channel.drain_pending();
        self.shared.state.send_replace(LoopState::Idle);
        *self.shared.fault.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Hidden presentation suspends delivery; showing again forces one
    /// immediate present so the first visible frame is fresh.
    pub fn set_presentation_active(&self, active: bool) {
        let was = self
            .shared
            .presentation_active
            .swap(active, Ordering::AcqRel);
        if active && !was {
            self.shared.force_present_once.store(true, Ordering::Release);
        }
    }

    pub fn presentation_active(&self) -> bool {
        self.shared.presentation_active.load(Ordering::Acquire)
    }

    /// Playback flags feed pacing only; the session updates them from
    /// property pushes.
    pub fn set_playback_flags(&self, paused: bool, eof: bool) {
        self.shared.playback_paused.store(paused, Ordering::Release);
        self.shared.playback_eof.store(eof, Ordering::Release);
    }

    /// Report an engine fault observed outside the loop task.
    pub fn fault_external(&self, message: &str) {
        self.shared.fault(message.to_owned());
    }
}

async fn run_loop(shared: Arc<LoopShared>, cancel: CancellationToken) {
    let started_at = Instant::now();
    let mut delivered_any = false;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        shared.diagnostics.record_tick();

        // A dead decoder reports nothing ready, so the acquire path alone
        // would never see its error. Poll the fault directly.
        if let Some(message) = shared.engine.fatal_error() {
            shared.fault(message);
            return;
        }

        // Startup must produce a first hand-off within the deadline.
        if !delivered_any
            && *shared.state.borrow() == LoopState::Starting
            && started_at.elapsed() >= shared.pacing.startup_timeout
        {
            shared.fault(BridgeError::FrameLoopStartTimeout.to_string());
            return;
        }

        // Ship a parked frame before pulling a new one.
        match shared.channel.pump(shared.generation.load(Ordering::Acquire)) {
            PumpOutcome::Delivered => shared.diagnostics.record_delivered(),
            PumpOutcome::DroppedStale | PumpOutcome::DroppedNoConsumer => {
                shared.diagnostics.record_dropped();
            }
            PumpOutcome::Busy => shared.diagnostics.record_skipped_busy(),
            PumpOutcome::Empty => {}
        }

        let force_once = shared.force_present_once.swap(false, Ordering::AcqRel);
        let presenting = shared.presentation_active.load(Ordering::Acquire) || force_once;
        let mut had_frame = false;

        if shared.engine.has_frame_ready() {
            // Tag with the generation as of the pull, not the hand-off: a
            // resize completing mid-acquire must invalidate this frame.
            let generation = shared.generation.load(Ordering::Acquire);
            // The pull races cancellation so an unresponsive engine cannot
            // pin this task past teardown.
            let acquired = tokio::select! {
                _ = cancel.cancelled() => break,
                result = shared.engine.acquire_frame() => result,
            };
            match acquired {
                Ok(Some(frame)) => {
                    had_frame = true;
                    if shared.generation.load(Ordering::Acquire) != generation {
                        (frame.release)(frame.handle.clone());
                        shared.diagnostics.record_dropped();
                    } else if !presenting {
                        // Keep the decoder flowing, skip presentation.
                        (frame.release)(frame.handle.clone());
                        shared.diagnostics.record_skipped_hidden();
                    } else {
                        let outcome = shared.channel.offer(frame, generation);
                        match outcome {
                            OfferOutcome::Delivered => {
                                shared.diagnostics.record_delivered();
                            }
                            OfferOutcome::Replaced => shared.diagnostics.record_dropped(),
                            OfferOutcome::Queued => {}
                            OfferOutcome::Released => {}
                        }
                        // Any hand-off ends the startup phase, a consumer-less
                        // channel included.
                        if !delivered_any {
                            delivered_any = true;
                            shared.try_transition(LoopState::Running);
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    if err.is_fatal() {
                        shared.fault(err.to_string());
                        return;
                    }
                    warn!("frame acquire failed: {err}");
                    shared.diagnostics.record_error(&err.to_string());
                }
            }
        } else if force_once {
            // Nothing decoded yet; re-arm so the next frame presents.
            shared.force_present_once.store(true, Ordering::Release);
        }

        let delay = shared.tick_delay(had_frame);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("frame loop task exiting ({:?})", *shared.state.borrow());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SoftwareEngine;
    use crate::texture::Frame;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct Fixture {
        engine: Arc<SoftwareEngine>,
        channel: Arc<SharedTextureChannel>,
        diagnostics: Arc<DiagnosticsRecorder>,
        controller: FrameLoopController,
        delivered: Arc<StdMutex<Vec<Frame>>>,
    }

    fn fixture() -> Fixture {
        let config = BridgeConfig::fast();
        let engine = Arc::new(SoftwareEngine::new(config.software_frame_interval));
        let channel = Arc::new(SharedTextureChannel::new());
        let diagnostics = Arc::new(DiagnosticsRecorder::new());
        diagnostics.set_enabled(true);
        let delivered: Arc<StdMutex<Vec<Frame>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        channel.set_consumer(Arc::new(move |frame| {
            sink.lock().unwrap().push(frame);
        }));
        let controller = FrameLoopController::new(
            engine.clone(),
            channel.clone(),
            diagnostics.clone(),
            Arc::new(AtomicU64::new(1)),
            &config,
        );
        Fixture {
            engine,
            channel,
            diagnostics,
            controller,
            delivered,
        }
    }

    async fn wait_for_state(controller: &FrameLoopController, want: LoopState) {
        let mut rx = controller.subscribe();
        let deadline = Duration::from_secs(2);
        tokio::time::timeout(deadline, async {
            while *rx.borrow() != want {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"));
    }

    #[test]
    fn test_transition_table() {
        use LoopState::*;
        assert!(Idle.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Faulted));
        assert!(Faulted.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Running));
        assert!(!Faulted.can_transition_to(Starting));
        assert!(!Running.can_transition_to(Starting));
    }

    #[tokio::test]
    async fn test_first_frame_moves_to_running() {
        let f = fixture();
        f.engine.init_surface(64, 64).await.unwrap();
        f.engine.load("a").await.unwrap();
        f.controller.start().unwrap();
        wait_for_state(&f.controller, LoopState::Running).await;
        assert!(!f.delivered.lock().unwrap().is_empty());
        f.delivered.lock().unwrap().clear();
        f.controller.stop().await;
        assert_eq!(f.controller.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_reentrant_start_is_noop() {
        let f = fixture();
        f.engine.init_surface(64, 64).await.unwrap();
        f.engine.load("a").await.unwrap();
        f.controller.start().unwrap();
        wait_for_state(&f.controller, LoopState::Running).await;
        assert_eq!(f.controller.start().unwrap(), LoopState::Running);
        f.delivered.lock().unwrap().clear();
        f.controller.stop().await;
    }

    #[tokio::test]
    async fn test_startup_timeout_faults() {
        let f = fixture();
        // no surface and no file: the engine never produces a frame
        f.controller.start().unwrap();
        wait_for_state(&f.controller, LoopState::Faulted).await;
        let fault = f.controller.last_fault().unwrap();
        assert_eq!(fault, BridgeError::FrameLoopStartTimeout.to_string());
        // only teardown leaves Faulted
        assert!(f.controller.start().is_err());
        f.controller.stop().await;
        assert_eq!(f.controller.state(), LoopState::Faulted);
        f.controller.reset().await;
        assert_eq!(f.controller.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_drains() {
        let f = fixture();
        f.engine.init_surface(64, 64).await.unwrap();
        f.engine.load("a").await.unwrap();
        f.engine.set_property("pause", json!(false)).await.unwrap();
        f.controller.start().unwrap();
        wait_for_state(&f.controller, LoopState::Running).await;
        f.controller.stop().await;
        f.controller.stop().await;
        assert_eq!(f.controller.state(), LoopState::Idle);
        // consumer-held frames are the only outstanding ones left
        let held = f.delivered.lock().unwrap().len() as u64;
        assert_eq!(f.channel.outstanding(), held);
    }

    #[tokio::test]
    async fn test_engine_fault_while_running() {
        let f = fixture();
        f.engine.init_surface(64, 64).await.unwrap();
        f.engine.load("a").await.unwrap();
        f.engine.set_property("pause", json!(false)).await.unwrap();
        f.controller.start().unwrap();
        wait_for_state(&f.controller, LoopState::Running).await;
        f.engine.inject_fatal("decoder crashed");
        wait_for_state(&f.controller, LoopState::Faulted).await;
        assert!(f.controller.last_fault().unwrap().contains("decoder crashed"));
        f.delivered.lock().unwrap().clear();
        f.controller.reset().await;
    }

    #[tokio::test]
    async fn test_hidden_presentation_skips_and_counts() {
        let f = fixture();
        f.engine.init_surface(64, 64).await.unwrap();
        f.engine.load("a").await.unwrap();
        f.engine.set_property("pause", json!(false)).await.unwrap();
        f.controller.start().unwrap();
        wait_for_state(&f.controller, LoopState::Running).await;
        f.controller.set_presentation_active(false);
        f.diagnostics.reset();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let hidden = f.diagnostics.snapshot().frames_skipped_hidden;
        assert!(hidden > 0, "expected hidden skips, got {hidden}");
        // showing again resumes delivery promptly
        f.delivered.lock().unwrap().clear();
        f.controller.set_presentation_active(true);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!f.delivered.lock().unwrap().is_empty());
        f.delivered.lock().unwrap().clear();
        f.controller.stop().await;
    }
}
