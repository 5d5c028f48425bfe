//! In-process software engine.
//!
//! Stands in when no hardware-backed decoder is available: it synthesizes
//! timing, a one-track media model and placeholder frames, so every layer
//! above the engine seam can run unchanged. The clock is anchor-based, not
//! tick-based, so time stays correct however rarely it is polled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, trace};
use serde_json::{Value, json};

use crate::engine::{EngineEvent, EngineFrame, MediaEngine};
use crate::error::{BridgeError, BridgeResult};

/// Duration reported for every synthesized source.
const SYNTH_DURATION_SEC: f64 = 60.0;

struct Inner {
    surface: Option<(u32, u32)>,
    source: Option<String>,
    paused: bool,
    speed: f64,
    // Clock anchor: position at `anchor` plus scaled elapsed time since.
    anchor_time_sec: f64,
    anchor: Option<Instant>,
    duration_sec: f64,
    eof: bool,
    eof_announced: bool,
    observed: HashSet<String>,
    props: HashMap<String, Value>,
    pending: VecDeque<EngineEvent>,
    last_polled_time: Option<f64>,
    frame_serial: u64,
    last_frame_at: Option<Instant>,
    frame_dirty: bool,
    fatal: Option<String>,
    fatal_announced: bool,
    shut_down: bool,
}

impl Inner {
    fn position(&self) -> f64 {
        let mut t = self.anchor_time_sec;
        if let Some(anchor) = self.anchor {
            if !self.paused && !self.eof {
                t += anchor.elapsed().as_secs_f64() * self.speed;
            }
        }
        t.clamp(0.0, self.duration_sec)
    }

    fn rebase(&mut self, time_sec: f64) {
        self.anchor_time_sec = time_sec.clamp(0.0, self.duration_sec);
        self.anchor = Some(Instant::now());
    }

    fn push_if_observed(&mut self, name: &str, value: Value) {
        if self.observed.contains(name) {
            self.pending.push_back(EngineEvent::PropertyChange {
                name: name.to_owned(),
                value,
            });
        }
    }
}

/// Software implementation of [`MediaEngine`].
pub struct SoftwareEngine {
    inner: Mutex<Inner>,
    frame_interval: Duration,
    /// Placeholder textures handed out and not yet released.
    outstanding: Arc<AtomicU64>,
}

impl SoftwareEngine {
    pub fn new(frame_interval: Duration) -> Self {
        let mut props = HashMap::new();
        props.insert("volume".into(), json!(100.0));
        props.insert("mute".into(), json!(false));
        props.insert("speed".into(), json!(1.0));
        props.insert("audio-delay".into(), json!(0.0));
        props.insert("sub-delay".into(), json!(0.0));
        props.insert("sub-visibility".into(), json!(true));
        props.insert("video-aspect-override".into(), json!("-1"));
        props.insert("video-crop".into(), json!(""));
        props.insert("aid".into(), json!(1));
        props.insert("sid".into(), json!(Value::Null));
        props.insert("track-list".into(), json!([]));
        props.insert("chapter-list".into(), json!([]));
        Self {
            inner: Mutex::new(Inner {
                surface: None,
                source: None,
                paused: true,
                speed: 1.0,
                anchor_time_sec: 0.0,
                anchor: None,
                duration_sec: 0.0,
                eof: false,
                eof_announced: false,
                observed: HashSet::new(),
                props,
                pending: VecDeque::new(),
                last_polled_time: None,
                frame_serial: 0,
                last_frame_at: None,
                frame_dirty: false,
                fatal: None,
                fatal_announced: false,
                shut_down: false,
            }),
            frame_interval,
            outstanding: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn guard(inner: &Inner) -> BridgeResult<()> {
        if let Some(message) = &inner.fatal {
            return Err(BridgeError::EngineFatal {
                message: message.clone(),
            });
        }
        if inner.shut_down {
            return Err(BridgeError::NotInitialized);
        }
        Ok(())
    }

    /// Number of handed-out frames whose textures were not released yet.
    pub fn outstanding_frames(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Poison the engine so every subsequent call fails fatally and the next
    /// event poll reports [`EngineEvent::Fatal`].
    #[cfg(test)]
    pub fn inject_fatal(&self, message: &str) {
        let mut inner = self.lock();
        inner.fatal = Some(message.to_owned());
    }

    fn synth_track_list(source: &str) -> Value {
        json!([
            { "id": 1, "type": "video", "codec": "synthetic" },
            { "id": 1, "type": "audio", "lang": "und", "default": true,
              "selected": true, "title": source },
        ])
    }

    fn advance(inner: &mut Inner) {
        if inner.source.is_none() || inner.eof {
            return;
        }
        let pos = inner.position();
        if pos >= inner.duration_sec && inner.duration_sec > 0.0 {
            inner.rebase(inner.duration_sec);
            inner.eof = true;
            inner.paused = true;
            inner.push_if_observed("eof-reached", json!(true));
            inner.push_if_observed("pause", json!(true));
            if !inner.eof_announced {
                inner.eof_announced = true;
                inner.pending.push_back(EngineEvent::EndOfFile);
            }
        }
    }
}

#[async_trait]
impl MediaEngine for SoftwareEngine {
    fn name(&self) -> &'static str {
        "software"
    }

    fn supports_in_place_resize(&self) -> bool {
        true
    }

    async fn init_surface(&self, width: u32, height: u32) -> BridgeResult<()> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidSize { width, height });
        }
        debug!("software surface init {width}x{height}");
        inner.surface = Some((width, height));
        inner.frame_dirty = true;
        Ok(())
    }

    async fn resize_surface(&self, width: u32, height: u32) -> BridgeResult<()> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        if inner.surface.is_none() {
            return Err(BridgeError::NotInitialized);
        }
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidSize { width, height });
        }
        inner.surface = Some((width, height));
        inner.frame_dirty = true;
        Ok(())
    }

    async fn load(&self, source: &str) -> BridgeResult<()> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        debug!("software load: {source}");
        inner.source = Some(source.to_owned());
        inner.duration_sec = SYNTH_DURATION_SEC;
        inner.eof = false;
        inner.eof_announced = false;
        inner.paused = true;
        inner.rebase(0.0);
        inner.frame_dirty = true;
        inner.last_polled_time = None;
        let tracks = Self::synth_track_list(source);
        inner.props.insert("track-list".into(), tracks.clone());
        inner
            .props
            .insert("duration".into(), json!(SYNTH_DURATION_SEC));
        inner.pending.push_back(EngineEvent::FileLoaded);
        inner.push_if_observed("duration", json!(SYNTH_DURATION_SEC));
        inner.push_if_observed("track-list", tracks);
        inner.push_if_observed("pause", json!(true));
        Ok(())
    }

    async fn command(&self, args: &[String]) -> BridgeResult<Value> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        let name = args.first().map(String::as_str).unwrap_or("");
        match name {
            "seek" => {
                let target: f64 = args
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| BridgeError::CommandFailed {
                        code: -1,
                        message: "seek: missing target".into(),
                    })?;
                let absolute = args.get(2).map(String::as_str) != Some("relative");
                let base = if absolute { 0.0 } else { inner.position() };
                inner.rebase(base + target);
                inner.eof = false;
                inner.eof_announced = false;
                inner.frame_dirty = true;
                let pos = inner.position();
                inner.push_if_observed("time-pos", json!(pos));
                inner.push_if_observed("eof-reached", json!(false));
                inner.last_polled_time = Some(pos);
                Ok(Value::Null)
            }
            "stop" => {
                inner.source = None;
                inner.rebase(0.0);
                inner.duration_sec = 0.0;
                inner.paused = true;
                inner.eof = false;
                inner.eof_announced = false;
                Ok(Value::Null)
            }
            "frame-step" => {
                inner.frame_dirty = true;
                Ok(Value::Null)
            }
            "screenshot-raw" => {
                let (w, h) = inner.surface.ok_or(BridgeError::NotInitialized)?;
                // Opaque black BGRA block, enough for callers to size buffers.
                Ok(json!({
                    "w": w,
                    "h": h,
                    "stride": w * 4,
                    "format": "bgr0",
                }))
            }
            other => Err(BridgeError::CommandFailed {
                code: -2,
                message: format!("unsupported command: {other}"),
            }),
        }
    }

    async fn get_property(&self, name: &str) -> BridgeResult<Value> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        Self::advance(&mut inner);
        match name {
            "time-pos" => Ok(json!(inner.position())),
            "duration" => Ok(json!(inner.duration_sec)),
            "pause" => Ok(json!(inner.paused)),
            "eof-reached" => Ok(json!(inner.eof)),
            other => Ok(inner.props.get(other).cloned().unwrap_or(Value::Null)),
        }
    }

    async fn set_property(&self, name: &str, value: Value) -> BridgeResult<()> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        match name {
            "pause" => {
                let paused = value.as_bool().unwrap_or(true);
                let pos = inner.position();
                inner.rebase(pos);
                inner.paused = paused;
                if !paused {
                    inner.eof = false;
                    inner.eof_announced = false;
                }
                inner.push_if_observed("pause", json!(paused));
            }
            "speed" => {
                let speed = value.as_f64().unwrap_or(1.0).max(0.01);
                let pos = inner.position();
                inner.rebase(pos);
                inner.speed = speed;
                inner.props.insert("speed".into(), json!(speed));
                inner.push_if_observed("speed", json!(speed));
            }
            "time-pos" => {
                let target = value.as_f64().unwrap_or(0.0);
                inner.rebase(target);
                let pos = inner.position();
                inner.push_if_observed("time-pos", json!(pos));
            }
            other => {
                inner.props.insert(other.to_owned(), value.clone());
                inner.push_if_observed(other, value);
            }
        }
        Ok(())
    }

    async fn observe_property(&self, name: &str) -> BridgeResult<()> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        if inner.observed.insert(name.to_owned()) {
            // Initial value push, mirroring observe semantics of real engines.
            let value = match name {
                "time-pos" => json!(inner.position()),
                "duration" => json!(inner.duration_sec),
                "pause" => json!(inner.paused),
                "eof-reached" => json!(inner.eof),
                other => inner.props.get(other).cloned().unwrap_or(Value::Null),
            };
            inner.pending.push_back(EngineEvent::PropertyChange {
                name: name.to_owned(),
                value,
            });
        }
        Ok(())
    }

    async fn unobserve_property(&self, name: &str) -> BridgeResult<()> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        inner.observed.remove(name);
        Ok(())
    }

    fn fatal_error(&self) -> Option<String> {
        self.lock().fatal.clone()
    }

    fn has_frame_ready(&self) -> bool {
        let inner = self.lock();
        if inner.fatal.is_some() || inner.shut_down || inner.surface.is_none() {
            return false;
        }
        if inner.source.is_none() {
            return false;
        }
        if inner.frame_dirty {
            return true;
        }
        if inner.paused || inner.eof {
            return false;
        }
        match inner.last_frame_at {
            Some(at) => at.elapsed() >= self.frame_interval,
            None => true,
        }
    }

    async fn acquire_frame(&self) -> BridgeResult<Option<EngineFrame>> {
        let mut inner = self.lock();
        Self::guard(&inner)?;
        if inner.surface.is_none() || inner.source.is_none() {
            return Ok(None);
        }
        let due = inner.frame_dirty
            || (!inner.paused
                && !inner.eof
                && inner
                    .last_frame_at
                    .map(|at| at.elapsed() >= self.frame_interval)
                    .unwrap_or(true));
        if !due {
            return Ok(None);
        }
        inner.frame_dirty = false;
        inner.last_frame_at = Some(Instant::now());
        inner.frame_serial += 1;
        let pts = inner.position();
        // Handle is the frame serial; nothing downstream inspects it.
        let handle = Bytes::copy_from_slice(&inner.frame_serial.to_be_bytes());
        drop(inner);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let outstanding = Arc::clone(&self.outstanding);
        trace!("software frame {} at {pts:.3}s", handle.len());
        Ok(Some(EngineFrame {
            handle,
            pts_sec: pts,
            release: Arc::new(move |_| {
                outstanding.fetch_sub(1, Ordering::AcqRel);
            }),
        }))
    }

    async fn poll_events(&self) -> Vec<EngineEvent> {
        let mut inner = self.lock();
        if let Some(message) = inner.fatal.clone() {
            if inner.fatal_announced {
                return Vec::new();
            }
            inner.fatal_announced = true;
            return vec![EngineEvent::Fatal { message }];
        }
        if inner.shut_down {
            return Vec::new();
        }
        Self::advance(&mut inner);
        // Synthesize time-pos ticks for observers; real engines push these.
        if inner.observed.contains("time-pos") && inner.source.is_some() {
            let pos = inner.position();
            let moved = inner
                .last_polled_time
                .map(|last| (pos - last).abs() > f64::EPSILON)
                .unwrap_or(true);
            if moved {
                inner.last_polled_time = Some(pos);
                inner.pending.push_back(EngineEvent::PropertyChange {
                    name: "time-pos".into(),
                    value: json!(pos),
                });
            }
        }
        inner.pending.drain(..).collect()
    }

    async fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shut_down = true;
        inner.source = None;
        inner.surface = None;
        inner.pending.clear();
        debug!("software engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SoftwareEngine {
        SoftwareEngine::new(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_load_emits_file_loaded_and_tracks() {
        let e = engine();
        e.init_surface(640, 360).await.unwrap();
        e.observe_property("duration").await.unwrap();
        let _ = e.poll_events().await;
        e.load("test.mkv").await.unwrap();
        let events = e.poll_events().await;
        assert!(events.contains(&EngineEvent::FileLoaded));
        assert!(events.iter().any(|ev| matches!(
            ev,
            EngineEvent::PropertyChange { name, .. } if name == "duration"
        )));
        let tracks = e.get_property("track-list").await.unwrap();
        assert_eq!(tracks.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clock_advances_only_while_playing() {
        let e = engine();
        e.init_surface(64, 64).await.unwrap();
        e.load("a").await.unwrap();
        let t0 = e.get_property("time-pos").await.unwrap().as_f64().unwrap();
        assert_eq!(t0, 0.0);
        e.set_property("pause", json!(false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let t1 = e.get_property("time-pos").await.unwrap().as_f64().unwrap();
        assert!(t1 > 0.0);
        e.set_property("pause", json!(true)).await.unwrap();
        let t2 = e.get_property("time-pos").await.unwrap().as_f64().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let t3 = e.get_property("time-pos").await.unwrap().as_f64().unwrap();
        assert!((t3 - t2).abs() < 0.005);
    }

    #[tokio::test]
    async fn test_seek_and_eof() {
        let e = engine();
        e.init_surface(64, 64).await.unwrap();
        e.load("a").await.unwrap();
        e.observe_property("eof-reached").await.unwrap();
        let _ = e.poll_events().await;
        e.command(&["seek".into(), format!("{SYNTH_DURATION_SEC}")])
            .await
            .unwrap();
        e.set_property("pause", json!(false)).await.unwrap();
        // seek to duration and unpause lands us at eof on the next poll
        e.command(&["seek".into(), format!("{SYNTH_DURATION_SEC}")])
            .await
            .unwrap();
        let events = e.poll_events().await;
        assert!(events.contains(&EngineEvent::EndOfFile));
        // eof fires once per load
        let again = e.poll_events().await;
        assert!(!again.contains(&EngineEvent::EndOfFile));
    }

    #[tokio::test]
    async fn test_time_pos_set_pushes_to_observers() {
        let e = engine();
        e.init_surface(64, 64).await.unwrap();
        e.load("a").await.unwrap();
        e.observe_property("time-pos").await.unwrap();
        let _ = e.poll_events().await;
        e.set_property("time-pos", json!(12.0)).await.unwrap();
        let events = e.poll_events().await;
        assert!(events.iter().any(|ev| matches!(
            ev,
            EngineEvent::PropertyChange { name, value }
                if name == "time-pos" && (value.as_f64().unwrap() - 12.0).abs() < 0.25
        )));
    }

    #[tokio::test]
    async fn test_frames_and_release() {
        let e = engine();
        e.init_surface(64, 64).await.unwrap();
        e.load("a").await.unwrap();
        assert!(e.has_frame_ready());
        let frame = e.acquire_frame().await.unwrap().unwrap();
        assert_eq!(e.outstanding_frames(), 1);
        (frame.release)(frame.handle.clone());
        assert_eq!(e.outstanding_frames(), 0);
        // paused with no dirty flag: nothing new
        assert!(!e.has_frame_ready());
        assert!(e.acquire_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fatal_poisons_everything() {
        let e = engine();
        e.init_surface(64, 64).await.unwrap();
        e.inject_fatal("decoder crashed");
        assert_eq!(e.fatal_error().as_deref(), Some("decoder crashed"));
        let events = e.poll_events().await;
        assert!(matches!(events.as_slice(), [EngineEvent::Fatal { .. }]));
        assert!(e.poll_events().await.is_empty());
        assert!(matches!(
            e.load("a").await,
            Err(BridgeError::EngineFatal { .. })
        ));
        assert!(!e.has_frame_ready());
    }

    #[tokio::test]
    async fn test_invalid_surface_size() {
        let e = engine();
        assert!(matches!(
            e.init_surface(0, 100).await,
            Err(BridgeError::InvalidSize { .. })
        ));
        assert!(matches!(
            e.resize_surface(10, 10).await,
            Err(BridgeError::NotInitialized)
        ));
    }
}
