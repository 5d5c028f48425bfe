//! Playback state, track and chapter models.
//!
//! Track and chapter lists are immutable snapshots: each one supersedes the
//! previous wholesale, there is no partial mutation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Clamp a JSON number into a finite f64, falling back otherwise.
pub(crate) fn finite_or(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => fallback,
    }
}

/// Kind of selectable media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Subtitle,
}

/// One entry of the track list, produced on load or track change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub kind: TrackKind,
    pub language: Option<String>,
    pub title: Option<String>,
    pub is_default: bool,
}

impl Track {
    /// Build a track from one engine-side record. Records that are neither
    /// audio nor subtitle (video, attachments) yield `None`.
    pub fn from_node(node: &Value) -> Option<Track> {
        let obj = node.as_object()?;
        let kind = match obj.get("type").and_then(Value::as_str) {
            Some("audio") => TrackKind::Audio,
            Some("sub") | Some("subtitle") => TrackKind::Subtitle,
            _ => return None,
        };
        let id = match obj.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        Some(Track {
            id,
            kind,
            language: text("lang").or_else(|| text("language")),
            title: text("title"),
            is_default: obj.get("default").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Normalize an engine track-list node into an ordered snapshot.
pub fn tracks_from_node(node: &Value) -> Vec<Track> {
    node.as_array()
        .map(|items| items.iter().filter_map(Track::from_node).collect())
        .unwrap_or_default()
}

/// Extract the currently selected audio/subtitle track ids from a raw
/// track-list node (the `selected` flag never survives into [`Track`]).
pub fn selections_from_node(node: &Value) -> (Option<String>, Option<String>) {
    let mut audio = None;
    let mut subtitle = None;
    if let Some(items) = node.as_array() {
        for item in items {
            let Some(obj) = item.as_object() else { continue };
            if !obj.get("selected").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let id = match obj.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            match obj.get("type").and_then(Value::as_str) {
                Some("audio") => audio = Some(id),
                Some("sub") | Some("subtitle") => subtitle = Some(id),
                _ => {}
            }
        }
    }
    (audio, subtitle)
}

/// A chapter marker within the loaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub time_sec: f64,
    pub title: String,
}

/// Normalize an engine chapter-list node, sorted by start time. Entries
/// without a finite time are skipped.
pub fn chapters_from_node(node: &Value) -> Vec<Chapter> {
    let mut chapters: Vec<Chapter> = node
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let obj = item.as_object()?;
                    let time = obj
                        .get("time")
                        .or_else(|| obj.get("time_sec"))
                        .or_else(|| obj.get("start"))
                        .and_then(Value::as_f64)?;
                    if !time.is_finite() {
                        return None;
                    }
                    let title = obj
                        .get("title")
                        .or_else(|| obj.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_owned();
                    Some(Chapter {
                        time_sec: time,
                        title,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    chapters.sort_by(|a, b| a.time_sec.total_cmp(&b.time_sec));
    chapters
}

/// Aggregate playback state for one session.
///
/// One instance per active session; replaced wholesale across
/// `destroy` → `init`. Volume is normalized to `0.0..=1.0` here even though
/// the engine speaks percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub ready: bool,
    pub paused: bool,
    pub time_sec: f64,
    pub duration_sec: f64,
    pub volume: f64,
    pub muted: bool,
    pub speed: f64,
    pub eof_reached: bool,
    pub audio_track_id: Option<String>,
    pub subtitle_track_id: Option<String>,
    pub audio_delay_sec: f64,
    pub subtitle_delay_sec: f64,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: String,
    pub crop: String,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            ready: false,
            paused: true,
            time_sec: 0.0,
            duration_sec: 0.0,
            volume: 1.0,
            muted: false,
            speed: 1.0,
            eof_reached: false,
            audio_track_id: None,
            subtitle_track_id: None,
            audio_delay_sec: 0.0,
            subtitle_delay_sec: 0.0,
            width: 0,
            height: 0,
            aspect_ratio: "auto".into(),
            crop: "none".into(),
        }
    }
}

/// Map an engine aspect-override value to the caller-facing form.
/// `-1`, `0`, `no` and empty all mean "no override".
pub(crate) fn normalize_aspect(raw: &str) -> String {
    let v = raw.trim();
    match v.to_ascii_lowercase().as_str() {
        "" | "no" | "0" | "-1" | "auto" => "auto".into(),
        _ => v.to_owned(),
    }
}

/// Map an engine crop string to the caller-facing form.
pub(crate) fn normalize_crop(raw: &str) -> String {
    let v = raw.trim();
    if v.is_empty() { "none".into() } else { v.to_owned() }
}
