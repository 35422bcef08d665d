//! Entities the console tracks, shaped after the backend's JSON payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Timestamp = DateTime<Utc>;

/// Axis-aligned box in normalized `[0, 1]` frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl NormalizedBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

/// Single detector hit pushed by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub stream_id: String,
    pub cls: String,
    pub conf: f32,
    #[serde(default, with = "bbox_array")]
    pub bbox: Option<NormalizedBox>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub ts: Timestamp,
}

impl Detection {
    /// Overlay caption, e.g. `fire (0.87)`.
    pub fn label(&self) -> String {
        format!("{} ({:.2})", self.cls, self.conf)
    }

    /// One line of the live ticker.
    pub fn ticker_line(&self) -> String {
        format!(
            "[{}] {} {}",
            self.ts.format("%H:%M:%S"),
            self.stream_id,
            self.label()
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Queued,
    Dispatched,
    Completed,
    Aborted,
    TimeoutRtl,
}

impl MissionStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MissionStatus::Completed | MissionStatus::Aborted | MissionStatus::TimeoutRtl
        )
    }

    /// Map a `mission_ended` reason onto a terminal status.
    ///
    /// The drone acknowledges with `completed`, `aborted` or `rtl`; the failsafe
    /// monitor ends stalled missions with `timeout`.
    pub fn from_end_reason(reason: &str) -> Option<Self> {
        match reason.trim().to_ascii_lowercase().as_str() {
            "completed" => Some(MissionStatus::Completed),
            "aborted" => Some(MissionStatus::Aborted),
            "timeout_rtl" | "rtl" | "timeout" => Some(MissionStatus::TimeoutRtl),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MissionStatus::Queued => "queued",
            MissionStatus::Dispatched => "dispatched",
            MissionStatus::Completed => "completed",
            MissionStatus::Aborted => "aborted",
            MissionStatus::TimeoutRtl => "timeout_rtl",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissionWaypoint {
    #[serde(alias = "mission_id", deserialize_with = "opaque_id::deserialize")]
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, alias = "altitude")]
    pub alt: f64,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: Timestamp,
    #[serde(default = "queued")]
    pub status: MissionStatus,
}

fn queued() -> MissionStatus {
    MissionStatus::Queued
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DroneState {
    #[serde(alias = "drone_id", deserialize_with = "opaque_id::deserialize")]
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
    #[serde(default)]
    pub battery: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub ts: Option<Timestamp>,
}

/// Acoustic distress event reported by a ground sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    #[serde(deserialize_with = "opaque_id::deserialize")]
    pub id: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub ts: Timestamp,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub prob_help: f32,
    pub sensor_id: String,
    #[serde(default)]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub battery: Option<f64>,
}

impl AudioEvent {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub message: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub ts: Option<Timestamp>,
    #[serde(default)]
    pub level: Option<String>,
}

impl LogLine {
    /// Parse a raw stream line of the form `[LEVEL] message @ timestamp`.
    ///
    /// Lines that do not follow that shape are kept verbatim as the message.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (level, rest) = match trimmed.strip_prefix('[').and_then(|s| s.split_once(']')) {
            Some((level, rest)) if !level.is_empty() && !level.contains(' ') => {
                (Some(level.to_string()), rest.trim_start())
            }
            _ => (None, trimmed),
        };
        let (message, ts) = match rest.rsplit_once(" @ ") {
            Some((message, stamp)) => match timestamp::parse(stamp.trim()) {
                Some(ts) => (message.trim_end(), Some(ts)),
                None => (rest, None),
            },
            None => (rest, None),
        };
        Self {
            message: message.to_string(),
            ts,
            level,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsTotals {
    pub audio_events: u64,
    pub detections: u64,
    pub missions_enqueued: u64,
    pub missions_completed: u64,
    pub rtl_issued: u64,
}

/// Per-minute counters in the metrics series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinuteBucket {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub ts: Timestamp,
    #[serde(flatten)]
    pub counts: MetricsTotals,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    #[serde(default)]
    pub totals: MetricsTotals,
    #[serde(default)]
    pub series: Vec<MinuteBucket>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub generated_at: Timestamp,
}

/// `[x, y, w, h]` on the wire; arrays of any other length read as no box.
mod bbox_array {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::NormalizedBox;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<NormalizedBox>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Vec<f32>>::deserialize(deserializer)?;
        Ok(raw.and_then(|values| match values.as_slice() {
            [x, y, w, h] => Some(NormalizedBox::new(*x, *y, *w, *h)),
            _ => None,
        }))
    }

    pub(super) fn serialize<S>(value: &Option<NormalizedBox>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(b) => [b.x, b.y, b.w, b.h].serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// Backend ids are integers for database rows and UUID strings for missions.
pub(crate) mod opaque_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => text,
            RawId::Number(n) => n.to_string(),
        })
    }

    /// Like [`deserialize`], with `null` read as absent.
    pub(crate) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
            RawId::Text(text) => text,
            RawId::Number(n) => n.to_string(),
        }))
    }
}

/// RFC 3339, with naive ISO timestamps read as UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    pub(crate) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }

    pub(crate) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }
}
