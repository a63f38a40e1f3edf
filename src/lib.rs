//! NaviCap core
//!
//! Decision and distribution layer for the NaviCap assistive-navigation device.
//!
//! # Architecture
//!
//! Two single-threaded processes share nothing but two JSON documents on disk:
//!
//! 1. **Detection side** (`navicap_detect`): per captured frame, fuses object detections,
//!    ultrasonic range samples and traffic-light color into one [`ObstacleEvent`], debounces it,
//!    and writes the obstacle document when the debouncer allows.
//! 2. **Distribution side** (`navicap_publish`): polls the obstacle and config documents,
//!    keeps last-value caches, serves reads, merges remote config writes and pushes
//!    notifications to at most one subscriber per topic.
//!
//! # Module Structure
//!
//! - `detect`: detector backend boundary and label normalization
//! - `frame`: frame source boundary
//! - `fusion`: distance filter, traffic-light selector, obstacle selector, publish debouncer
//! - `channel`: persisted documents, obstacle/config channels, config merge, distribution loop
//! - `transport`: notification transport boundary (in-memory and MQTT)
//! - `config`: process settings (file + environment)

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod channel;
pub mod config;
pub mod detect;
pub mod frame;
pub mod fusion;
pub mod transport;

pub use channel::{
    merge_update, AlertConfig, AlertsUpdate, ConfigChannel, ConfigStore, ConfigUpdate,
    DistributionLoop, DocumentPoll, MergeOutcome, ObstacleChannel, ObstacleProducer,
    PersistedDocument, Subscription,
};
pub use config::{FusionTunables, NavicapConfig};
pub use detect::{
    BoundingBox, DetectParams, Detection, DetectorBackend, RawDetection, StubBackend,
};
pub use frame::{Frame, FrameSource, StubFrameSource};
pub use fusion::{
    DistanceFilter, FusionEngine, PrimaryObstacle, PublishDebouncer, RangeSensor,
    TrafficLightSelector,
};
pub use transport::{MemoryTransport, SubscriberHandle, Topic, Transport, TransportEvent};

/// Obstacle label used when a frame has no detections at all.
pub const OBSTACLE_NONE: &str = "none";

/// Obstacle label served before the first obstacle document has been read.
pub const OBSTACLE_READY: &str = "ready";

// -------------------- Traffic Color --------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum TrafficColor {
    Red,
    Green,
    #[default]
    Unknown,
}

impl TrafficColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficColor::Red => "red",
            TrafficColor::Green => "green",
            TrafficColor::Unknown => "unknown",
        }
    }

    /// True for a color that was actually observed (red or green).
    pub fn is_positive(&self) -> bool {
        !matches!(self, TrafficColor::Unknown)
    }
}

impl From<String> for TrafficColor {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "red" => TrafficColor::Red,
            "green" => TrafficColor::Green,
            _ => TrafficColor::Unknown,
        }
    }
}

impl fmt::Display for TrafficColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Alert Categories --------------------

/// Closed set of alertable categories.
///
/// Variants are declared in lexical order of their labels so that `BTreeSet<Category>`
/// iterates (and serializes) sorted by label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Door,
    Escalator,
    Motorcycle,
    Person,
    Stairs,
    TrafficLight,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Door,
        Category::Escalator,
        Category::Motorcycle,
        Category::Person,
        Category::Stairs,
        Category::TrafficLight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Door => "door",
            Category::Escalator => "escalator",
            Category::Motorcycle => "motorcycle",
            Category::Person => "person",
            Category::Stairs => "stairs",
            Category::TrafficLight => "traffic_light",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == label.trim())
    }

    /// Obstacle categories take priority in primary-obstacle selection.
    /// Traffic lights are tracked for color, not as obstacles.
    pub fn is_obstacle(&self) -> bool {
        !matches!(self, Category::TrafficLight)
    }

    pub fn defaults() -> BTreeSet<Category> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Returns true when `label` names one of the priority obstacle categories.
pub fn is_obstacle_label(label: &str) -> bool {
    Category::from_label(label).is_some_and(|category| category.is_obstacle())
}

// -------------------- Obstacle Events --------------------

/// Latest obstacle assessment. Doubles as the obstacle document wire format:
/// `{"obstacle": .., "distance": .., "traffic": .., "ts": ..}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleEvent {
    #[serde(default = "default_obstacle_label")]
    pub obstacle: String,
    /// Meters. `+inf` means no valid range and is written as `null`.
    #[serde(rename = "distance", default, with = "distance_json")]
    pub distance_m: f64,
    #[serde(default)]
    pub traffic: TrafficColor,
    #[serde(rename = "ts", default = "Utc::now", with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ObstacleEvent {
    pub fn new(obstacle: impl Into<String>, distance_m: f64, traffic: TrafficColor) -> Self {
        let mut event = Self {
            obstacle: obstacle.into(),
            distance_m,
            traffic,
            timestamp: Utc::now(),
        };
        event.normalize();
        event
    }

    /// Initial value served by the distribution side before any document is read.
    pub fn ready() -> Self {
        Self::new(OBSTACLE_READY, 0.0, TrafficColor::Unknown)
    }

    /// Enforce the event invariants on values that came from outside.
    pub fn normalize(&mut self) {
        if self.obstacle.trim().is_empty() {
            self.obstacle = OBSTACLE_NONE.to_string();
        }
        if self.distance_m.is_nan() || self.distance_m < 0.0 {
            self.distance_m = f64::INFINITY;
        }
    }
}

fn default_obstacle_label() -> String {
    OBSTACLE_NONE.to_string()
}

mod distance_json {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

mod iso_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        // Producers without a zone suffix still write UTC.
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
            });
        Ok(parsed.unwrap_or_else(|_| Utc::now()))
    }
}

// -------------------- Time --------------------

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// ISO-8601 UTC timestamp used in history and error logs.
pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Append a fatal error with its cause chain to `path`.
pub fn append_error_log(path: &Path, err: &anyhow::Error) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{} {:#}", iso_now(), err)?;
    Ok(())
}
