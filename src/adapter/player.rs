//! Engine-backed [`PlayerAdapter`] implementation.
//!
//! `EnginePlayer` translates session events into the typed facade events and
//! maps playback verbs onto session properties and commands. It holds no
//! playback state of its own beyond what event translation needs (dedup
//! flags and the volume mirror).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::events::{EventEmitter, EventHandler, PlayerEvent, Subscription};
use crate::adapter::{Capabilities, LoadOptions, PlayerAdapter};
use crate::config::BridgeConfig;
use crate::engine::MediaEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::frame_loop::LoopState;
use crate::model::{
    Chapter, PlaybackState, Track, TrackKind, chapters_from_node, normalize_aspect,
    normalize_crop, tracks_from_node,
};
use crate::properties::PropertyValue;
use crate::session::{PlayerSession, SessionEvent};

/// Properties the adapter observes beyond the session's core set, so its
/// event surface stays complete.
const ADAPTER_OBSERVED: [&str; 4] = ["volume", "mute", "speed", "chapter-list"];

pub struct EnginePlayer {
    session: Arc<PlayerSession>,
    emitter: Arc<EventEmitter>,
    capabilities: Capabilities,
    load_seq: Arc<AtomicU64>,
    bridge_cancel: CancellationToken,
    bridge_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for EnginePlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnginePlayer")
            .field("capabilities", &self.capabilities)
            .field("loop_state", &self.session.loop_state())
            .finish_non_exhaustive()
    }
}

impl EnginePlayer {
    pub async fn new(
        engine: Arc<dyn MediaEngine>,
        config: BridgeConfig,
    ) -> BridgeResult<Arc<Self>> {
        let capabilities = Capabilities::for_backend(engine.name());
        let session = PlayerSession::new(engine, config).await?;
        for name in ADAPTER_OBSERVED {
            session.observe_property(name).await?;
        }
        let rx = session
            .take_events()
            .ok_or_else(|| BridgeError::Internal(anyhow::anyhow!("event stream taken")))?;
        let emitter = Arc::new(EventEmitter::new());
        let load_seq = Arc::new(AtomicU64::new(0));
        let bridge_cancel = CancellationToken::new();
        let bridge_task = tokio::spawn(run_event_bridge(
            rx,
            Arc::clone(&emitter),
            Arc::clone(&load_seq),
            bridge_cancel.clone(),
        ));
        Ok(Arc::new(Self {
            session,
            emitter,
            capabilities,
            load_seq,
            bridge_cancel,
            bridge_task: Mutex::new(Some(bridge_task)),
        }))
    }

    /// The underlying session, for surface setup, frame consumption and
    /// diagnostics.
    pub fn session(&self) -> &Arc<PlayerSession> {
        &self.session
    }

    async fn get_float(&self, name: &str, fallback: f64) -> BridgeResult<f64> {
        let value = self.session.get_property(name).await?;
        Ok(value.as_f64().unwrap_or(fallback))
    }

    async fn track_ids(&self, kind: TrackKind) -> BridgeResult<Vec<String>> {
        let tracks = self.session.get_track_list().await?;
        Ok(tracks
            .into_iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.id)
            .collect())
    }

    async fn set_track(&self, selector: &str, id: Option<&str>) -> BridgeResult<()> {
        let value = match id {
            None => Value::from("no"),
            // Numeric ids go through as numbers, the form engines expect.
            Some(id) => id
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(id)),
        };
        self.session
            .set_property(selector, PropertyValue::Node(value))
            .await
    }

    fn require(&self, capability: bool, what: &str) -> BridgeResult<()> {
        if capability {
            Ok(())
        } else {
            Err(BridgeError::CommandFailed {
                code: -3,
                message: format!("{what} not supported by this backend"),
            })
        }
    }
}

#[async_trait]
impl PlayerAdapter for EnginePlayer {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn load(&self, source: &str, options: LoadOptions) -> BridgeResult<()> {
        // Callers that skip surface setup get the configured default size.
        if self.session.surface_info().await.is_none() {
            let (w, h) = {
                let config = self.session.config();
                (config.surface_width, config.surface_height)
            };
            self.session.init_gpu(w, h).await?;
        }
        self.load_seq.fetch_add(1, Ordering::AcqRel);
        self.session.load_file(source).await?;
        if let Some(start) = options.start_seconds {
            if start > 0.0 {
                self.seek_to(start).await?;
            }
        }
        Ok(())
    }

    async fn play(&self) -> BridgeResult<()> {
        self.session
            .set_property("pause", PropertyValue::Flag(false))
            .await
    }

    async fn pause(&self) -> BridgeResult<()> {
        self.session
            .set_property("pause", PropertyValue::Flag(true))
            .await
    }

    async fn toggle_play(&self) -> BridgeResult<()> {
        let paused = self
            .session
            .get_property("pause")
            .await?
            .as_bool()
            .unwrap_or(true);
        self.session
            .set_property("pause", PropertyValue::Flag(!paused))
            .await
    }

    /// Pause and rewind, keeping the file loaded.
    async fn stop(&self) -> BridgeResult<()> {
        self.pause().await?;
        self.seek_to(0.0).await
    }

    /// Drop the loaded file entirely.
    async fn unload(&self) -> BridgeResult<()> {
        self.session.command(&["stop".into()]).await.map(|_| ())
    }

    async fn destroy(&self) {
        self.bridge_cancel.cancel();
        let task = self
            .bridge_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.session.destroy().await;
        debug!("player adapter destroyed");
    }

    async fn seek_to(&self, seconds: f64) -> BridgeResult<()> {
        self.session
            .command(&["seek".into(), seconds.to_string(), "absolute".into()])
            .await
            .map(|_| ())
    }

    async fn seek_by(&self, delta_seconds: f64) -> BridgeResult<()> {
        self.session
            .command(&["seek".into(), delta_seconds.to_string(), "relative".into()])
            .await
            .map(|_| ())
    }

    async fn get_state(&self) -> BridgeResult<PlaybackState> {
        self.session.get_state().await
    }

    async fn get_duration(&self) -> BridgeResult<f64> {
        Ok(self.get_float("duration", 0.0).await?.max(0.0))
    }

    async fn get_tracks(&self) -> BridgeResult<Vec<Track>> {
        self.session.get_track_list().await
    }

    async fn get_chapters(&self) -> BridgeResult<Vec<Chapter>> {
        let node = self.session.get_property("chapter-list").await?.to_json();
        Ok(chapters_from_node(&node))
    }

    async fn set_volume(&self, volume: f64) -> BridgeResult<()> {
        let percent = (volume.clamp(0.0, 1.0) * 100.0 * 100.0).round() / 100.0;
        self.session
            .set_property("volume", PropertyValue::Float(percent))
            .await
    }

    async fn set_muted(&self, muted: bool) -> BridgeResult<()> {
        self.session
            .set_property("mute", PropertyValue::Flag(muted))
            .await
    }

    async fn set_speed(&self, factor: f64) -> BridgeResult<()> {
        self.session
            .set_property("speed", PropertyValue::Float(factor.clamp(0.1, 8.0)))
            .await
    }

    async fn get_audio_track(&self) -> BridgeResult<Option<String>> {
        Ok(self.session.get_state().await?.audio_track_id)
    }

    async fn set_audio_track(&self, id: Option<&str>) -> BridgeResult<()> {
        self.set_track("aid", id).await
    }

    /// Rotate through audio tracks; with none there is nothing to select.
    async fn cycle_audio_track(&self) -> BridgeResult<Option<String>> {
        let ids = self.track_ids(TrackKind::Audio).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        let current = self.get_audio_track().await?;
        let next = match current.and_then(|id| ids.iter().position(|c| *c == id)) {
            Some(i) => ids[(i + 1) % ids.len()].clone(),
            None => ids[0].clone(),
        };
        self.set_track("aid", Some(&next)).await?;
        Ok(Some(next))
    }

    async fn get_subtitle_track(&self) -> BridgeResult<Option<String>> {
        Ok(self.session.get_state().await?.subtitle_track_id)
    }

    async fn set_subtitle_track(&self, id: Option<&str>) -> BridgeResult<()> {
        self.set_track("sid", id).await
    }

    /// Rotate off -> first -> ... -> last -> off.
    async fn cycle_subtitle_track(&self) -> BridgeResult<Option<String>> {
        let ids = self.track_ids(TrackKind::Subtitle).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        let current = self.get_subtitle_track().await?;
        let next = match current.and_then(|id| ids.iter().position(|c| *c == id)) {
            Some(i) if i + 1 < ids.len() => Some(ids[i + 1].clone()),
            Some(_) => None,
            None => Some(ids[0].clone()),
        };
        self.set_track("sid", next.as_deref()).await?;
        Ok(next)
    }

    async fn add_external_subtitle(&self, path: &str) -> BridgeResult<()> {
        self.require(self.capabilities.external_subtitles, "external subtitles")?;
        self.session
            .command(&["sub-add".into(), path.into(), "auto".into()])
            .await
            .map(|_| ())
    }

    async fn get_audio_delay(&self) -> BridgeResult<f64> {
        self.get_float("audio-delay", 0.0).await
    }

    async fn set_audio_delay(&self, seconds: f64) -> BridgeResult<()> {
        self.session
            .set_property("audio-delay", PropertyValue::Float(seconds))
            .await
    }

    async fn get_subtitle_delay(&self) -> BridgeResult<f64> {
        self.get_float("sub-delay", 0.0).await
    }

    async fn set_subtitle_delay(&self, seconds: f64) -> BridgeResult<()> {
        self.session
            .set_property("sub-delay", PropertyValue::Float(seconds))
            .await
    }

    async fn get_aspect_ratio(&self) -> BridgeResult<String> {
        let value = self.session.get_property("video-aspect-override").await?;
        Ok(normalize_aspect(&value_text(value)))
    }

    async fn set_aspect_ratio(&self, aspect: &str) -> BridgeResult<()> {
        // "auto" maps to the engine's no-override sentinel.
        let engine_value = if aspect == "auto" { "-1" } else { aspect };
        self.session
            .set_property(
                "video-aspect-override",
                PropertyValue::Text(engine_value.into()),
            )
            .await
    }

    async fn get_crop(&self) -> BridgeResult<String> {
        let value = self.session.get_property("video-crop").await?;
        Ok(normalize_crop(&value_text(value)))
    }

    async fn set_crop(&self, crop: &str) -> BridgeResult<()> {
        let engine_value = if crop == "none" { "" } else { crop };
        self.session
            .set_property("video-crop", PropertyValue::Text(engine_value.into()))
            .await
    }

    async fn reset_video_transforms(&self) -> BridgeResult<()> {
        self.set_aspect_ratio("auto").await?;
        self.set_crop("none").await
    }

    async fn take_screenshot(&self, path: &str) -> BridgeResult<()> {
        self.require(self.capabilities.screenshots, "screenshots")?;
        self.session
            .command(&[
                "screenshot-to-file".into(),
                path.into(),
                "video".into(),
            ])
            .await
            .map(|_| ())
    }

    fn on(&self, handler: EventHandler) -> Subscription {
        self.emitter.subscribe(handler)
    }
}

fn value_text(value: PropertyValue) -> String {
    match value {
        PropertyValue::Text(s) => s,
        PropertyValue::Int(i) => i.to_string(),
        PropertyValue::Float(f) => f.to_string(),
        _ => String::new(),
    }
}

struct Translator {
    emitter: Arc<EventEmitter>,
    load_seq: Arc<AtomicU64>,
    ended_for_seq: Option<u64>,
    last_paused: Option<bool>,
    ready_emitted: bool,
    volume: f64,
    muted: bool,
}

impl Translator {
    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PropertyChange { name, value } => {
                self.property_change(&name, value)
            }
            SessionEvent::FileLoaded => self.emitter.emit(&PlayerEvent::FileLoaded),
            SessionEvent::EndOfFile => {
                // Once per load cycle, however often the engine repeats it.
                let seq = self.load_seq.load(Ordering::Acquire);
                if self.ended_for_seq != Some(seq) {
                    self.ended_for_seq = Some(seq);
                    self.emitter.emit(&PlayerEvent::Ended);
                }
            }
            SessionEvent::LoopStateChanged(state) => {
                if state == LoopState::Running && !self.ready_emitted {
                    self.ready_emitted = true;
                    self.emitter.emit(&PlayerEvent::Ready);
                }
            }
            SessionEvent::EngineError { message, fatal } => {
                self.emitter.emit(&PlayerEvent::Error { message, fatal });
            }
        }
    }

    fn property_change(&mut self, name: &str, value: PropertyValue) {
        match name {
            "time-pos" => {
                if let Some(seconds) = value.as_f64() {
                    self.emitter.emit(&PlayerEvent::Time { seconds });
                }
            }
            "duration" => {
                if let Some(seconds) = value.as_f64() {
                    self.emitter.emit(&PlayerEvent::Duration { seconds });
                }
            }
            "pause" => {
                if let Some(paused) = value.as_bool() {
                    if self.last_paused != Some(paused) {
                        self.last_paused = Some(paused);
                        let event = if paused {
                            PlayerEvent::Pause
                        } else {
                            PlayerEvent::Play
                        };
                        self.emitter.emit(&event);
                    }
                }
            }
            "track-list" => {
                let tracks = tracks_from_node(&value.to_json());
                self.emitter.emit(&PlayerEvent::Tracks(tracks));
            }
            "chapter-list" => {
                let chapters = chapters_from_node(&value.to_json());
                self.emitter.emit(&PlayerEvent::Chapters(chapters));
            }
            "volume" => {
                if let Some(percent) = value.as_f64() {
                    self.volume = (percent / 100.0).clamp(0.0, 1.0);
                    self.emitter.emit(&PlayerEvent::Volume {
                        volume: self.volume,
                        muted: self.muted,
                    });
                }
            }
            "mute" => {
                if let Some(muted) = value.as_bool() {
                    self.muted = muted;
                    self.emitter.emit(&PlayerEvent::Volume {
                        volume: self.volume,
                        muted,
                    });
                }
            }
            "speed" => {
                if let Some(factor) = value.as_f64() {
                    self.emitter.emit(&PlayerEvent::Speed { factor });
                }
            }
            _ => {}
        }
    }
}

async fn run_event_bridge(
    mut rx: mpsc::Receiver<SessionEvent>,
    emitter: Arc<EventEmitter>,
    load_seq: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut translator = Translator {
        emitter,
        load_seq,
        ended_for_seq: None,
        last_paused: None,
        ready_emitted: false,
        volume: 1.0,
        muted: false,
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => translator.handle(event),
                None => break,
            },
        }
    }
    debug!("adapter event bridge exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::create_adapter;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    type EventLog = Arc<StdMutex<Vec<PlayerEvent>>>;

    async fn player_with_events() -> (Arc<EnginePlayer>, EventLog) {
        let player = create_adapter("software", BridgeConfig::fast())
            .await
            .unwrap();
        let log: EventLog = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        player.on(Arc::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));
        player.session().init_gpu(64, 64).await.unwrap();
        (player, log)
    }

    async fn wait_for(log: &EventLog, want: impl Fn(&PlayerEvent) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if log.lock().unwrap().iter().any(&want) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event did not arrive");
    }

    fn count(log: &EventLog, want: impl Fn(&PlayerEvent) -> bool) -> usize {
        log.lock().unwrap().iter().filter(|e| want(e)).count()
    }

    #[tokio::test]
    async fn test_ready_and_file_loaded() {
        let (player, log) = player_with_events().await;
        player.load("movie.mkv", LoadOptions::default()).await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::FileLoaded)).await;
        player.session().start_frame_loop().await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::Ready)).await;
        wait_for(&log, |e| matches!(e, PlayerEvent::Tracks(t) if t.len() == 1)).await;
        player.destroy().await;
    }

    #[tokio::test]
    async fn test_play_pause_events_dedup() {
        let (player, log) = player_with_events().await;
        player.load("a", LoadOptions::default()).await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::FileLoaded)).await;
        player.play().await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::Play)).await;
        player.play().await.unwrap(); // no state change, no second event
        player.pause().await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::Pause)).await;
        assert_eq!(count(&log, |e| matches!(e, PlayerEvent::Play)), 1);
        player.destroy().await;
    }

    #[tokio::test]
    async fn test_ended_once_per_load() {
        let (player, log) = player_with_events().await;
        player.load("a", LoadOptions::default()).await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::FileLoaded)).await;
        player.seek_to(60.0).await.unwrap();
        player.play().await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::Ended)).await;
        assert_eq!(count(&log, |e| matches!(e, PlayerEvent::Ended)), 1);
        // a new load opens a new cycle
        player.load("b", LoadOptions::default()).await.unwrap();
        player.seek_to(60.0).await.unwrap();
        player.play().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while count(&log, |e| matches!(e, PlayerEvent::Ended)) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("second ended did not arrive");
        player.destroy().await;
    }

    #[tokio::test]
    async fn test_resume_load_seeks() {
        let (player, _log) = player_with_events().await;
        player
            .load(
                "a",
                LoadOptions {
                    start_seconds: Some(12.5),
                },
            )
            .await
            .unwrap();
        let state = player.get_state().await.unwrap();
        assert!((state.time_sec - 12.5).abs() < 0.5);
        player.destroy().await;
    }

    #[tokio::test]
    async fn test_volume_and_speed_round_trip() {
        let (player, log) = player_with_events().await;
        player.load("a", LoadOptions::default()).await.unwrap();
        player.set_volume(0.5).await.unwrap();
        wait_for(&log, |e| {
            matches!(e, PlayerEvent::Volume { volume, .. } if (*volume - 0.5).abs() < 1e-9)
        })
        .await;
        player.set_muted(true).await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::Volume { muted: true, .. })).await;
        let state = player.get_state().await.unwrap();
        assert!((state.volume - 0.5).abs() < 1e-9);
        assert!(state.muted);
        player.set_speed(2.0).await.unwrap();
        wait_for(&log, |e| matches!(e, PlayerEvent::Speed { factor } if *factor == 2.0)).await;
        player.destroy().await;
    }

    #[tokio::test]
    async fn test_track_cycling() {
        let (player, _log) = player_with_events().await;
        player.load("a", LoadOptions::default()).await.unwrap();
        // single audio track: cycling keeps selecting it
        let next = player.cycle_audio_track().await.unwrap();
        assert_eq!(next.as_deref(), Some("1"));
        // no subtitle tracks at all
        assert_eq!(player.cycle_subtitle_track().await.unwrap(), None);
        player.destroy().await;
    }

    #[tokio::test]
    async fn test_transforms_and_reset() {
        let (player, _log) = player_with_events().await;
        player.load("a", LoadOptions::default()).await.unwrap();
        player.set_aspect_ratio("16:9").await.unwrap();
        assert_eq!(player.get_aspect_ratio().await.unwrap(), "16:9");
        player.set_crop("640x360+0+0").await.unwrap();
        assert_eq!(player.get_crop().await.unwrap(), "640x360+0+0");
        player.reset_video_transforms().await.unwrap();
        assert_eq!(player.get_aspect_ratio().await.unwrap(), "auto");
        assert_eq!(player.get_crop().await.unwrap(), "none");
        player.destroy().await;
    }

    #[tokio::test]
    async fn test_unsupported_capabilities_fail_locally() {
        let (player, _log) = player_with_events().await;
        assert!(matches!(
            player.take_screenshot("/tmp/shot.png").await,
            Err(BridgeError::CommandFailed { code: -3, .. })
        ));
        assert!(matches!(
            player.add_external_subtitle("subs.srt").await,
            Err(BridgeError::CommandFailed { code: -3, .. })
        ));
        player.destroy().await;
    }
}
