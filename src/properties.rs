//! Property registry.
//!
//! Single owner of cached property values and observer bookkeeping. Names are
//! validated against a declared table before anything reaches the engine, so
//! typos fail locally. Change pushes for hot properties (`time-pos`,
//! `duration`) are coalesced most-recent-wins and flushed on a bounded
//! interval; everything else flushes immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::MediaEngine;
use crate::error::{BridgeError, BridgeResult};

/// Declared value kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Flag,
    Int,
    Float,
    Text,
    /// Structured or polymorphic values; no local validation.
    Node,
}

impl PropertyKind {
    pub fn expected(self) -> &'static str {
        match self {
            PropertyKind::Flag => "flag",
            PropertyKind::Int => "int",
            PropertyKind::Float => "float",
            PropertyKind::Text => "text",
            PropertyKind::Node => "node",
        }
    }

    /// Int narrows into Float; nothing else coerces.
    pub fn accepts(self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (PropertyKind::Flag, PropertyValue::Flag(_))
                | (PropertyKind::Int, PropertyValue::Int(_))
                | (PropertyKind::Float, PropertyValue::Float(_))
                | (PropertyKind::Float, PropertyValue::Int(_))
                | (PropertyKind::Text, PropertyValue::Text(_))
                | (PropertyKind::Node, _)
        )
    }
}

/// A property value crossing the bridge boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Flag(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Node(Value),
}

impl PropertyValue {
    pub fn from_json(value: Value) -> PropertyValue {
        match value {
            Value::Bool(b) => PropertyValue::Flag(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropertyValue::Int(i)
                } else {
                    PropertyValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => PropertyValue::Text(s),
            other => PropertyValue::Node(other),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Flag(b) => Value::Bool(*b),
            PropertyValue::Int(i) => Value::from(*i),
            PropertyValue::Float(f) => Value::from(*f),
            PropertyValue::Text(s) => Value::from(s.clone()),
            PropertyValue::Node(v) => v.clone(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::Flag(_) => "flag",
            PropertyValue::Int(_) => "int",
            PropertyValue::Float(_) => "float",
            PropertyValue::Text(_) => "text",
            PropertyValue::Node(_) => "node",
        }
    }
}

/// Every property the bridge knows about, with its declared kind.
static DECLARED: Lazy<HashMap<&'static str, PropertyKind>> = Lazy::new(|| {
    use PropertyKind::*;
    HashMap::from([
        ("time-pos", Float),
        ("duration", Float),
        ("pause", Flag),
        ("eof-reached", Flag),
        ("volume", Float),
        ("mute", Flag),
        ("speed", Float),
        ("audio-delay", Float),
        ("sub-delay", Float),
        ("sub-visibility", Flag),
        ("track-list", Node),
        ("chapter-list", Node),
        ("video-aspect-override", Text),
        ("video-crop", Text),
        // Track selectors take an id or "no"; validated engine-side.
        ("aid", Node),
        ("sid", Node),
        ("scale", Text),
        ("cscale", Text),
        ("dscale", Text),
        ("deband", Flag),
        ("deband-iterations", Int),
        ("interpolation", Flag),
        ("video-sync", Text),
    ])
});

/// High-churn properties whose pushes ride the coalescing window.
const HOT: [&str; 2] = ["time-pos", "duration"];

pub fn declared_kind(name: &str) -> Option<PropertyKind> {
    DECLARED.get(name).copied()
}

fn is_hot(name: &str) -> bool {
    HOT.contains(&name)
}

/// Revocable observer registration returned by [`PropertyRegistry::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveHandle {
    pub id: u64,
}

struct RegistryState {
    /// name -> handle ids observing it.
    observers: HashMap<String, Vec<u64>>,
    /// handle id -> name, for unobserve.
    handles: HashMap<u64, String>,
    cache: HashMap<String, PropertyValue>,
    /// Pending hot pushes, most recent value per name.
    hot_pending: HashMap<String, PropertyValue>,
    last_hot_flush: Instant,
}

/// See module docs.
pub struct PropertyRegistry {
    engine: Arc<dyn MediaEngine>,
    state: Mutex<RegistryState>,
    next_handle: AtomicU64,
    hot_flush_interval: Duration,
}

impl PropertyRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, hot_flush_interval: Duration) -> Self {
        Self {
            engine,
            state: Mutex::new(RegistryState {
                observers: HashMap::new(),
                handles: HashMap::new(),
                cache: HashMap::new(),
                hot_pending: HashMap::new(),
                last_hot_flush: Instant::now(),
            }),
            next_handle: AtomicU64::new(1),
            hot_flush_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_known(name: &str) -> BridgeResult<PropertyKind> {
        declared_kind(name).ok_or_else(|| BridgeError::UnknownProperty {
            name: name.to_owned(),
        })
    }

    pub async fn get(&self, name: &str) -> BridgeResult<PropertyValue> {
        Self::check_known(name)?;
        let raw = self.engine.get_property(name).await?;
        let value = PropertyValue::from_json(raw);
        self.lock().cache.insert(name.to_owned(), value.clone());
        Ok(value)
    }

    /// Kind mismatches fail here; the engine is never contacted for them.
    pub async fn set(&self, name: &str, value: PropertyValue) -> BridgeResult<()> {
        let kind = Self::check_known(name)?;
        if !kind.accepts(&value) {
            return Err(BridgeError::InvalidPropertyValue {
                name: name.to_owned(),
                expected: kind.expected(),
                got: value.kind_name().to_owned(),
            });
        }
        self.engine.set_property(name, value.to_json()).await?;
        self.lock().cache.insert(name.to_owned(), value);
        Ok(())
    }

    /// Last value seen for `name`, without touching the engine.
    pub fn cached(&self, name: &str) -> Option<PropertyValue> {
        self.lock().cache.get(name).cloned()
    }

    /// Register an observer. The engine-side subscription is created once per
    /// name however many handles exist for it.
    pub async fn observe(&self, name: &str) -> BridgeResult<ObserveHandle> {
        Self::check_known(name)?;
        let first = {
            let state = self.lock();
            !state.observers.contains_key(name)
        };
        if first {
            self.engine.observe_property(name).await?;
        }
        let id = self.next_handle.fetch_add(1, Ordering::AcqRel);
        let mut state = self.lock();
        state.observers.entry(name.to_owned()).or_default().push(id);
        state.handles.insert(id, name.to_owned());
        debug!("observe {name} (handle {id})");
        Ok(ObserveHandle { id })
    }

    /// Drop an observer registration. Unknown or already-dropped handles are
    /// a no-op. The engine subscription ends with the last handle.
    pub async fn unobserve(&self, handle: ObserveHandle) -> BridgeResult<()> {
        let released_name = {
            let mut state = self.lock();
            let Some(name) = state.handles.remove(&handle.id) else {
                return Ok(());
            };
            let empty = match state.observers.get_mut(&name) {
                Some(ids) => {
                    ids.retain(|id| *id != handle.id);
                    ids.is_empty()
                }
                None => true,
            };
            if empty {
                state.observers.remove(&name);
                Some(name)
            } else {
                None
            }
        };
        if let Some(name) = released_name {
            self.engine.unobserve_property(&name).await?;
        }
        Ok(())
    }

    pub fn is_observed(&self, name: &str) -> bool {
        self.lock().observers.contains_key(name)
    }

    pub fn observed_names(&self) -> Vec<String> {
        self.lock().observers.keys().cloned().collect()
    }

    /// Feed one engine-side change push through the coalescing policy.
    /// Returns the push to deliver now, or `None` when it was stashed in the
    /// hot window (a later [`Self::take_hot_flush`] will carry it).
    pub fn ingest(&self, name: &str, raw: Value) -> Option<(String, PropertyValue)> {
        if declared_kind(name).is_none() {
            warn!("dropping change push for undeclared property {name}");
            return None;
        }
        let value = PropertyValue::from_json(raw);
        let mut state = self.lock();
        state.cache.insert(name.to_owned(), value.clone());
        if is_hot(name) {
            state.hot_pending.insert(name.to_owned(), value);
            None
        } else {
            Some((name.to_owned(), value))
        }
    }

    /// Drain the hot window when its flush interval elapsed. Out-of-window
    /// calls return nothing and leave pending values in place.
    pub fn take_hot_flush(&self) -> Vec<(String, PropertyValue)> {
        let mut state = self.lock();
        if state.hot_pending.is_empty()
            || state.last_hot_flush.elapsed() < self.hot_flush_interval
        {
            return Vec::new();
        }
        state.last_hot_flush = Instant::now();
        state.hot_pending.drain().collect()
    }

    /// Unconditional drain, used on teardown so no push is lost.
    pub fn drain_hot(&self) -> Vec<(String, PropertyValue)> {
        let mut state = self.lock();
        state.last_hot_flush = Instant::now();
        state.hot_pending.drain().collect()
    }

    /// Tear down every engine-side subscription. Handles stay consumed.
    pub async fn unobserve_all(&self) {
        let names: Vec<String> = {
            let mut state = self.lock();
            state.handles.clear();
            state.observers.drain().map(|(name, _)| name).collect()
        };
        for name in names {
            if let Err(err) = self.engine.unobserve_property(&name).await {
                warn!("unobserve {name} during teardown failed: {err}");
            }
        }
    }
}
