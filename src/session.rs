//! Playback session.
//!
//! One `PlayerSession` per embedded player. It owns the engine handle, the
//! surface manager, the property registry, the frame loop and the diagnostics
//! recorder, and exposes one method per bridge entry point. Sessions are
//! created and destroyed freely; nothing here is process-wide.
//!
//! A background pump task drains engine events, routes property pushes
//! through the registry's coalescing policy and forwards everything to the
//! session event stream the facade consumes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, trace, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::CommandDispatcher;
use crate::config::BridgeConfig;
use crate::diagnostics::{DiagnosticsRecorder, DiagnosticsSnapshot};
use crate::engine::{EngineEvent, MediaEngine};
use crate::error::{BridgeError, BridgeResult};
use crate::frame_loop::{FrameLoopController, LoopState};
use crate::model::{
    PlaybackState, Track, finite_or, normalize_aspect, normalize_crop,
    selections_from_node, tracks_from_node,
};
use crate::properties::{ObserveHandle, PropertyRegistry, PropertyValue};
use crate::surface::{SurfaceInfo, SurfaceManager};
use crate::texture::{FrameConsumer, SharedTextureChannel};

/// Properties the session itself keeps observed for its lifetime.
const CORE_OBSERVED: [&str; 5] = ["time-pos", "duration", "pause", "eof-reached", "track-list"];

/// Backpressure bound on the session event queue. When nothing drains it the
/// newest push is dropped; coalesced hot properties resend their latest value
/// on the next flush, so a bounded queue loses no terminal value.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// What the backend reports before any surface exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub backend: &'static str,
    pub shared_texture: bool,
}

/// Events flowing from the session to its facade.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PropertyChange { name: String, value: PropertyValue },
    FileLoaded,
    EndOfFile,
    LoopStateChanged(LoopState),
    EngineError { message: String, fatal: bool },
}

struct PumpContext {
    engine: Arc<dyn MediaEngine>,
    registry: Arc<PropertyRegistry>,
    frame_loop: Arc<FrameLoopController>,
    diagnostics: Arc<DiagnosticsRecorder>,
    tx: mpsc::Sender<SessionEvent>,
    loaded: Arc<AtomicBool>,
    poll_interval: Duration,
    poll_idle_interval: Duration,
}

pub struct PlayerSession {
    engine: Arc<dyn MediaEngine>,
    config: BridgeConfig,
    surface: Mutex<SurfaceManager>,
    registry: Arc<PropertyRegistry>,
    dispatcher: CommandDispatcher,
    channel: Arc<SharedTextureChannel>,
    frame_loop: Arc<FrameLoopController>,
    diagnostics: Arc<DiagnosticsRecorder>,
    loaded: Arc<AtomicBool>,
    destroyed: AtomicBool,
    pump_cancel: CancellationToken,
    pump_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    events: std::sync::Mutex<Option<mpsc::Receiver<SessionEvent>>>,
}

impl PlayerSession {
    /// Build a session around an engine and start its event pump. The core
    /// property set is observed up front so state pushes flow immediately.
    pub async fn new(
        engine: Arc<dyn MediaEngine>,
        config: BridgeConfig,
    ) -> BridgeResult<Arc<Self>> {
        let registry = Arc::new(PropertyRegistry::new(
            Arc::clone(&engine),
            config.hot_property_flush_interval,
        ));
        for name in CORE_OBSERVED {
            registry.observe(name).await?;
        }
        let generation = Arc::new(AtomicU64::new(0));
        let channel = Arc::new(SharedTextureChannel::new());
        let diagnostics = Arc::new(DiagnosticsRecorder::new());
        let frame_loop = Arc::new(FrameLoopController::new(
            Arc::clone(&engine),
            Arc::clone(&channel),
            Arc::clone(&diagnostics),
            Arc::clone(&generation),
            &config,
        ));
        let surface = Mutex::new(SurfaceManager::new(Arc::clone(&engine), generation));
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let loaded = Arc::new(AtomicBool::new(false));
        let pump_cancel = CancellationToken::new();
        let context = PumpContext {
            engine: Arc::clone(&engine),
            registry: Arc::clone(&registry),
            frame_loop: Arc::clone(&frame_loop),
            diagnostics: Arc::clone(&diagnostics),
            tx,
            loaded: Arc::clone(&loaded),
            poll_interval: config.event_poll_interval,
            poll_idle_interval: config.event_poll_idle_interval,
        };
        let loop_rx = frame_loop.subscribe();
        let cancel = pump_cancel.clone();
        let pump_task = tokio::spawn(run_event_pump(context, loop_rx, cancel));
        info!("player session created (backend {})", engine.name());
        Ok(Arc::new(Self {
            dispatcher: CommandDispatcher::new(Arc::clone(&engine)),
            engine,
            config,
            surface,
            registry,
            channel,
            frame_loop,
            diagnostics,
            loaded,
            destroyed: AtomicBool::new(false),
            pump_cancel,
            pump_task: std::sync::Mutex::new(Some(pump_task)),
            events: std::sync::Mutex::new(Some(rx)),
        }))
    }

    fn ensure_alive(&self) -> BridgeResult<()> {
        if self.destroyed.load(Ordering::Acquire) {
            Err(BridgeError::SessionDestroyed)
        } else {
            Ok(())
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Take the session event stream. Single consumer; later calls get
    /// `None`.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Attach the frame consumer delivered frames go to.
    pub fn set_frame_consumer(&self, consumer: FrameConsumer) {
        self.channel.set_consumer(consumer);
    }

    pub fn probe(&self) -> ProbeReport {
        ProbeReport {
            backend: self.engine.name(),
            shared_texture: true,
        }
    }

    pub async fn init_gpu(&self, width: u32, height: u32) -> BridgeResult<SurfaceInfo> {
        self.ensure_alive()?;
        self.surface.lock().await.init(width, height).await
    }

    pub async fn resize_surface(&self, width: u32, height: u32) -> BridgeResult<SurfaceInfo> {
        self.ensure_alive()?;
        self.surface.lock().await.resize(width, height).await
    }

    pub async fn surface_info(&self) -> Option<SurfaceInfo> {
        self.surface.lock().await.info()
    }

    pub async fn load_file(&self, source: &str) -> BridgeResult<()> {
        self.ensure_alive()?;
        self.loaded.store(false, Ordering::Release);
        self.frame_loop.set_playback_flags(true, false);
        self.engine.load(source).await
    }

    /// Start frame delivery. Requires an initialized surface.
    pub async fn start_frame_loop(&self) -> BridgeResult<LoopState> {
        self.ensure_alive()?;
        if !self.surface.lock().await.is_initialized() {
            return Err(BridgeError::NotInitialized);
        }
        self.frame_loop.start()
    }

    pub async fn stop_frame_loop(&self) -> BridgeResult<()> {
        self.ensure_alive()?;
        self.frame_loop.stop().await;
        Ok(())
    }

    pub fn loop_state(&self) -> LoopState {
        self.frame_loop.state()
    }

    pub async fn command(&self, argv: &[String]) -> BridgeResult<Value> {
        self.ensure_alive()?;
        self.dispatcher.dispatch(argv).await
    }

    pub async fn get_property(&self, name: &str) -> BridgeResult<PropertyValue> {
        self.ensure_alive()?;
        self.registry.get(name).await
    }

    pub async fn set_property(&self, name: &str, value: PropertyValue) -> BridgeResult<()> {
        self.ensure_alive()?;
        self.registry.set(name, value.clone()).await?;
        // Pacing flags track pause synchronously; the push echo is too late
        // for the next tick.
        if name == "pause" {
            if let Some(paused) = value.as_bool() {
                let eof = self
                    .registry
                    .cached("eof-reached")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.frame_loop.set_playback_flags(paused, eof);
            }
        }
        Ok(())
    }

    pub async fn observe_property(&self, name: &str) -> BridgeResult<ObserveHandle> {
        self.ensure_alive()?;
        self.registry.observe(name).await
    }

    pub async fn unobserve_property(&self, handle: ObserveHandle) -> BridgeResult<()> {
        self.ensure_alive()?;
        self.registry.unobserve(handle).await
    }

    /// Snapshot the aggregate playback state from live engine properties.
    pub async fn get_state(&self) -> BridgeResult<PlaybackState> {
        self.ensure_alive()?;
        let float = |v: BridgeResult<PropertyValue>, fallback: f64| match v {
            Ok(value) => finite_or(value.as_f64(), fallback),
            Err(_) => fallback,
        };
        let flag = |v: BridgeResult<PropertyValue>, fallback: bool| {
            v.ok().and_then(|value| value.as_bool()).unwrap_or(fallback)
        };
        let time_sec = float(self.registry.get("time-pos").await, 0.0);
        let duration_sec = float(self.registry.get("duration").await, 0.0).max(0.0);
        let paused = flag(self.registry.get("pause").await, true);
        let eof_reached = flag(self.registry.get("eof-reached").await, false);
        let volume = (float(self.registry.get("volume").await, 100.0) / 100.0).clamp(0.0, 1.0);
        let muted = flag(self.registry.get("mute").await, false);
        let speed = float(self.registry.get("speed").await, 1.0).max(0.01);
        let audio_delay_sec = float(self.registry.get("audio-delay").await, 0.0);
        let subtitle_delay_sec = float(self.registry.get("sub-delay").await, 0.0);
        let tracks_node = self
            .registry
            .get("track-list")
            .await
            .map(|v| v.to_json())
            .unwrap_or(Value::Null);
        let (audio_track_id, subtitle_track_id) = selections_from_node(&tracks_node);
        let aspect_ratio = normalize_aspect(&text_of(self.registry.get("video-aspect-override").await));
        let crop = normalize_crop(&text_of(self.registry.get("video-crop").await));
        let (width, height) = match self.surface.lock().await.info() {
            Some(info) => (info.width, info.height),
            None => (0, 0),
        };
        Ok(PlaybackState {
            ready: self.loaded.load(Ordering::Acquire),
            paused,
            time_sec: time_sec.max(0.0),
            duration_sec,
            volume,
            muted,
            speed,
            eof_reached,
            audio_track_id,
            subtitle_track_id,
            audio_delay_sec,
            subtitle_delay_sec,
            width,
            height,
            aspect_ratio,
            crop,
        })
    }

    /// Current track list, replaced wholesale on every call.
    pub async fn get_track_list(&self) -> BridgeResult<Vec<Track>> {
        self.ensure_alive()?;
        let node = self.registry.get("track-list").await?.to_json();
        Ok(tracks_from_node(&node))
    }

    pub fn set_presentation_active(&self, active: bool) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        self.frame_loop.set_presentation_active(active);
    }

    pub fn get_diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn set_diagnostics_enabled(&self, enabled: bool) {
        self.diagnostics.set_enabled(enabled);
    }

    pub fn reset_diagnostics(&self) {
        self.diagnostics.reset();
    }

    /// Outstanding (unreleased) frames, pending slot included.
    pub fn outstanding_frames(&self) -> u64 {
        self.channel.outstanding()
    }

    /// Tear the session down. Idempotent; every later mutating call fails
    /// with `SessionDestroyed`. Engine shutdown is bounded by the teardown
    /// timeout so a hung engine cannot block the caller.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("destroying player session");
        let teardown = self.config.teardown_timeout;
        self.pump_cancel.cancel();
        let pump = self
            .pump_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut pump) = pump {
            if tokio::time::timeout(teardown, &mut pump).await.is_err() {
                warn!("event pump did not stop within {teardown:?}, aborting");
                pump.abort();
                let _ = pump.await;
            }
        }
        self.frame_loop.reset().await;
        self.channel.clear_consumer();
        self.channel.drain_pending();
        if tokio::time::timeout(teardown, self.registry.unobserve_all())
            .await
            .is_err()
        {
            warn!("unobserve pass exceeded {teardown:?}, abandoning");
        }
        if tokio::time::timeout(teardown, self.engine.shutdown())
            .await
            .is_err()
        {
            warn!("engine shutdown exceeded {teardown:?}, abandoning");
        }
        self.loaded.store(false, Ordering::Release);
        debug!(
            "session destroyed, outstanding frames: {}",
            self.channel.outstanding()
        );
    }
}

/// Non-blocking enqueue. A full queue means nothing drains it; the newest
/// event is dropped rather than stalling the pump.
fn forward(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            trace!("session event queue full, dropped {event:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

fn text_of(value: BridgeResult<PropertyValue>) -> String {
    match value {
        Ok(PropertyValue::Text(s)) => s,
        Ok(PropertyValue::Int(i)) => i.to_string(),
        Ok(PropertyValue::Float(f)) => f.to_string(),
        _ => String::new(),
    }
}

async fn run_event_pump(
    context: PumpContext,
    mut loop_rx: watch::Receiver<LoopState>,
    cancel: CancellationToken,
) {
    let mut fault_reported = false;
    loop {
        let delay = if context.frame_loop.state().is_active() {
            context.poll_interval
        } else {
            context.poll_idle_interval
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = loop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *loop_rx.borrow_and_update();
                forward(&context.tx, SessionEvent::LoopStateChanged(state));
                if state == LoopState::Faulted && !fault_reported {
                    fault_reported = true;
                    let message = context
                        .frame_loop
                        .last_fault()
                        .unwrap_or_else(|| "frame loop faulted".into());
                    forward(&context.tx, SessionEvent::EngineError {
                        message,
                        fatal: true,
                    });
                }
            }
            _ = tokio::time::sleep(delay) => {
                // Engine polling races cancellation too; a hung engine would
                // otherwise pin this task through destroy().
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = pump_once(&context, &mut fault_reported) => {}
                }
            }
        }
    }
    debug!("session event pump exiting");
}

async fn pump_once(context: &PumpContext, fault_reported: &mut bool) {
    for event in context.engine.poll_events().await {
        match event {
            EngineEvent::PropertyChange { name, value } => {
                sync_playback_flags(context, &name, &value);
                if let Some((name, value)) = context.registry.ingest(&name, value) {
                    forward(&context.tx, SessionEvent::PropertyChange { name, value });
                }
            }
            EngineEvent::FileLoaded => {
                context.loaded.store(true, Ordering::Release);
                forward(&context.tx, SessionEvent::FileLoaded);
            }
            EngineEvent::EndOfFile => {
                context.frame_loop.set_playback_flags(true, true);
                forward(&context.tx, SessionEvent::EndOfFile);
            }
            EngineEvent::Fatal { message } => {
                context.diagnostics.record_error(&message);
                context.frame_loop.fault_external(&message);
                if !*fault_reported {
                    *fault_reported = true;
                    forward(&context.tx, SessionEvent::EngineError {
                        message,
                        fatal: true,
                    });
                }
            }
        }
    }
    for (name, value) in context.registry.take_hot_flush() {
        forward(&context.tx, SessionEvent::PropertyChange { name, value });
    }
}

/// Pause and eof pushes drive frame-loop pacing.
fn sync_playback_flags(context: &PumpContext, name: &str, value: &Value) {
    let cached_flag = |prop: &str, fallback: bool| {
        context
            .registry
            .cached(prop)
            .and_then(|v| v.as_bool())
            .unwrap_or(fallback)
    };
    match name {
        "pause" => {
            if let Some(paused) = value.as_bool() {
                context
                    .frame_loop
                    .set_playback_flags(paused, cached_flag("eof-reached", false));
            }
        }
        "eof-reached" => {
            if let Some(eof) = value.as_bool() {
                context
                    .frame_loop
                    .set_playback_flags(cached_flag("pause", true), eof);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SoftwareEngine;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    async fn session() -> (Arc<SoftwareEngine>, Arc<PlayerSession>) {
        let config = BridgeConfig::fast();
        let engine = Arc::new(SoftwareEngine::new(config.software_frame_interval));
        let session = PlayerSession::new(engine.clone(), config).await.unwrap();
        (engine, session)
    }

    async fn next_event(
        rx: &mut mpsc::Receiver<SessionEvent>,
        want: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = rx.recv().await.unwrap();
                if want(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (_, s) = session().await;
        let mut rx = s.take_events().unwrap();
        assert!(s.take_events().is_none());

        let probe = s.probe();
        assert_eq!(probe.backend, "software");
        assert!(probe.shared_texture);

        let info = s.init_gpu(640, 360).await.unwrap();
        assert_eq!((info.width, info.height), (640, 360));

        let frames: Arc<StdMutex<u64>> = Arc::new(StdMutex::new(0));
        let sink = Arc::clone(&frames);
        s.set_frame_consumer(Arc::new(move |frame| {
            *sink.lock().unwrap() += 1;
            frame.release();
        }));

        s.load_file("movie.mkv").await.unwrap();
        next_event(&mut rx, |e| matches!(e, SessionEvent::FileLoaded)).await;

        s.start_frame_loop().await.unwrap();
        next_event(&mut rx, |e| {
            matches!(e, SessionEvent::LoopStateChanged(LoopState::Running))
        })
        .await;
        assert!(*frames.lock().unwrap() > 0);

        let state = s.get_state().await.unwrap();
        assert!(state.ready);
        assert!(state.paused);
        assert_eq!(state.duration_sec, 60.0);
        assert_eq!(state.volume, 1.0);
        assert_eq!((state.width, state.height), (640, 360));
        assert_eq!(state.audio_track_id.as_deref(), Some("1"));

        let tracks = s.get_track_list().await.unwrap();
        assert_eq!(tracks.len(), 1); // the synthetic video record is filtered

        s.destroy().await;
        assert_eq!(s.outstanding_frames(), 0);
    }

    #[tokio::test]
    async fn test_frame_loop_requires_surface() {
        let (_, s) = session().await;
        assert!(matches!(
            s.start_frame_loop().await,
            Err(BridgeError::NotInitialized)
        ));
        s.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_guards_mutators() {
        let (_, s) = session().await;
        s.destroy().await;
        s.destroy().await;
        assert!(matches!(
            s.load_file("a").await,
            Err(BridgeError::SessionDestroyed)
        ));
        assert!(matches!(
            s.set_property("pause", PropertyValue::Flag(false)).await,
            Err(BridgeError::SessionDestroyed)
        ));
        assert!(matches!(
            s.init_gpu(64, 64).await,
            Err(BridgeError::SessionDestroyed)
        ));
    }

    #[tokio::test]
    async fn test_property_pushes_flow_and_hot_coalesce() {
        let (_, s) = session().await;
        let mut rx = s.take_events().unwrap();
        s.init_gpu(64, 64).await.unwrap();
        s.load_file("a").await.unwrap();
        // cold push: pause flows through without a window. The observe-time
        // echo (paused) precedes it, so wait for the updated value.
        s.set_property("pause", PropertyValue::Flag(false))
            .await
            .unwrap();
        let event = next_event(&mut rx, |e| {
            matches!(
                e,
                SessionEvent::PropertyChange { name, value }
                    if name == "pause" && value.as_bool() == Some(false)
            )
        })
        .await;
        match event {
            SessionEvent::PropertyChange { value, .. } => {
                assert_eq!(value.as_bool(), Some(false));
            }
            _ => unreachable!(),
        }
        // hot push: time-pos arrives through the coalescing window
        let event = next_event(&mut rx, |e| {
            matches!(e, SessionEvent::PropertyChange { name, .. } if name == "time-pos")
        })
        .await;
        match event {
            SessionEvent::PropertyChange { value, .. } => {
                assert!(value.as_f64().is_some());
            }
            _ => unreachable!(),
        }
        s.destroy().await;
    }

    #[tokio::test]
    async fn test_engine_fatal_surfaces_once() {
        let (engine, s) = session().await;
        let mut rx = s.take_events().unwrap();
        s.init_gpu(64, 64).await.unwrap();
        s.load_file("a").await.unwrap();
        s.start_frame_loop().await.unwrap();
        next_event(&mut rx, |e| {
            matches!(e, SessionEvent::LoopStateChanged(LoopState::Running))
        })
        .await;
        engine.inject_fatal("decoder crashed");
        let event = next_event(&mut rx, |e| matches!(e, SessionEvent::EngineError { .. })).await;
        match event {
            SessionEvent::EngineError { message, fatal } => {
                assert!(fatal);
                assert!(message.contains("decoder crashed"));
            }
            _ => unreachable!(),
        }
        assert_eq!(s.loop_state(), LoopState::Faulted);
        // property reads hit the poisoned engine and fail structurally
        assert!(matches!(
            s.get_property("time-pos").await,
            Err(BridgeError::EngineFatal { .. })
        ));
        // loop operations are rejected until teardown
        assert!(s.start_frame_loop().await.is_err());
        s.destroy().await;
        assert_eq!(s.outstanding_frames(), 0);
    }

    #[tokio::test]
    async fn test_resize_invalidates_old_generation_frames() {
        let (_, s) = session().await;
        let mut rx = s.take_events().unwrap();
        let generations: Arc<StdMutex<Vec<u64>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&generations);
        s.set_frame_consumer(Arc::new(move |frame| {
            sink.lock().unwrap().push(frame.generation);
            frame.release();
        }));
        let first = s.init_gpu(320, 180).await.unwrap();
        s.load_file("a").await.unwrap();
        s.set_property("pause", PropertyValue::Flag(false))
            .await
            .unwrap();
        s.start_frame_loop().await.unwrap();
        next_event(&mut rx, |e| {
            matches!(e, SessionEvent::LoopStateChanged(LoopState::Running))
        })
        .await;
        let resized = s.resize_surface(640, 360).await.unwrap();
        assert!(resized.generation > first.generation);
        generations.lock().unwrap().clear();
        // every frame delivered after the resize carries the new generation
        tokio::time::timeout(Duration::from_secs(2), async {
            while generations.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(
            generations
                .lock()
                .unwrap()
                .iter()
                .all(|g| *g == resized.generation)
        );
        s.destroy().await;
    }

    /// Engine whose pending calls never resolve, as a crashed decoder
    /// process looks from this side of the seam.
    struct HungEngine;

    #[async_trait::async_trait]
    impl MediaEngine for HungEngine {
        fn name(&self) -> &'static str {
            "hung"
        }
        fn supports_in_place_resize(&self) -> bool {
            true
        }
        async fn init_surface(&self, _width: u32, _height: u32) -> BridgeResult<()> {
            Ok(())
        }
        async fn resize_surface(&self, _width: u32, _height: u32) -> BridgeResult<()> {
            Ok(())
        }
        async fn load(&self, _source: &str) -> BridgeResult<()> {
            std::future::pending().await
        }
        async fn command(&self, _args: &[String]) -> BridgeResult<Value> {
            std::future::pending().await
        }
        async fn get_property(&self, _name: &str) -> BridgeResult<Value> {
            std::future::pending().await
        }
        async fn set_property(&self, _name: &str, _value: Value) -> BridgeResult<()> {
            std::future::pending().await
        }
        async fn observe_property(&self, _name: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn unobserve_property(&self, _name: &str) -> BridgeResult<()> {
            std::future::pending().await
        }
        fn has_frame_ready(&self) -> bool {
            true
        }
        async fn acquire_frame(&self) -> BridgeResult<Option<crate::engine::EngineFrame>> {
            std::future::pending().await
        }
        async fn poll_events(&self) -> Vec<EngineEvent> {
            std::future::pending().await
        }
        async fn shutdown(&self) {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_destroy_bounded_with_hung_engine() {
        let config = BridgeConfig::fast();
        let teardown = config.teardown_timeout;
        let s = PlayerSession::new(Arc::new(HungEngine), config).await.unwrap();
        s.init_gpu(64, 64).await.unwrap();
        s.start_frame_loop().await.unwrap();
        // every teardown stage is individually bounded by the timeout
        tokio::time::timeout(teardown * 4 + Duration::from_secs(1), s.destroy())
            .await
            .expect("destroy must return with an unresponsive engine");
        assert!(matches!(
            s.load_file("a").await,
            Err(BridgeError::SessionDestroyed)
        ));
    }

    #[tokio::test]
    async fn test_event_queue_is_bounded_without_consumer() {
        let (_, s) = session().await;
        s.init_gpu(64, 64).await.unwrap();
        s.load_file("a").await.unwrap();
        s.set_property("pause", PropertyValue::Flag(false))
            .await
            .unwrap();
        // nobody drains the queue; the session must stay responsive
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(s.get_state().await.is_ok());
        let mut rx = s.take_events().unwrap();
        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert!(queued <= EVENT_QUEUE_CAPACITY);
        s.destroy().await;
    }

    #[tokio::test]
    async fn test_diagnostics_surface() {
        let (_, s) = session().await;
        s.set_diagnostics_enabled(true);
        assert!(s.get_diagnostics().enabled);
        s.set_diagnostics_enabled(false);
        s.reset_diagnostics();
        assert_eq!(s.get_diagnostics().frames_delivered, 0);
        s.destroy().await;
    }
}
