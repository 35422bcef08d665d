//! Push topics and the tagged event union the reconciler consumes.

use serde::Deserialize;
use thiserror::Error;

use crate::model::{
    AudioEvent, Detection, DroneState, LogLine, MissionStatus, MissionWaypoint, Timestamp,
    opaque_id, timestamp,
};

/// Real-time channel exposed by the backend under `/realtime/<topic>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Detections,
    Events,
    Status,
    Logs,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::Detections, Topic::Events, Topic::Status, Topic::Logs];

    pub fn label(self) -> &'static str {
        match self {
            Topic::Detections => "detections",
            Topic::Events => "events",
            Topic::Status => "status",
            Topic::Logs => "logs",
        }
    }

    /// Path of the SSE endpoint relative to the API base.
    pub fn path(self) -> String {
        format!("/realtime/{}", self.label())
    }

    /// Decode one message payload delivered on this topic.
    pub fn decode(self, data: &str) -> Result<ConsoleEvent, DecodeError> {
        match self {
            Topic::Detections => Ok(ConsoleEvent::Detection(serde_json::from_str(data)?)),
            Topic::Events => match serde_json::from_str::<EventsEnvelope>(data)? {
                EventsEnvelope::AudioEvent(event) => Ok(ConsoleEvent::AudioEvent(event)),
            },
            Topic::Status => serde_json::from_str::<StatusEnvelope>(data)?.into_event(),
            Topic::Logs => {
                if data.trim().is_empty() {
                    return Err(DecodeError::Empty);
                }
                Ok(ConsoleEvent::Log(LogLine::from_raw(data)))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mission_enqueued without waypoint fields")]
    IncompleteWaypoint,
    #[error("empty payload")]
    Empty,
}

/// Every mutation the reconciler knows how to apply.
#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleEvent {
    Detection(Detection),
    AudioEvent(AudioEvent),
    MissionEnqueued(MissionWaypoint),
    MissionDispatched { id: String },
    MissionEnded { id: String, reason: String },
    MissionTimeoutRtl { id: String },
    DroneUpdate(DroneState),
    Log(LogLine),
}

impl ConsoleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsoleEvent::Detection(_) => "detection",
            ConsoleEvent::AudioEvent(_) => "audio_event",
            ConsoleEvent::MissionEnqueued(_) => "mission_enqueued",
            ConsoleEvent::MissionDispatched { .. } => "mission_dispatched",
            ConsoleEvent::MissionEnded { .. } => "mission_ended",
            ConsoleEvent::MissionTimeoutRtl { .. } => "mission_timeout_rtl",
            ConsoleEvent::DroneUpdate(_) => "drone_update",
            ConsoleEvent::Log(_) => "log",
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventsEnvelope {
    AudioEvent(AudioEvent),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StatusEnvelope {
    MissionEnqueued(EnqueuedPayload),
    MissionDispatched(MissionRef),
    MissionEnded(EndedPayload),
    MissionTimeoutRtl(MissionRef),
    DroneUpdate(DroneState),
}

impl StatusEnvelope {
    fn into_event(self) -> Result<ConsoleEvent, DecodeError> {
        Ok(match self {
            StatusEnvelope::MissionEnqueued(payload) => {
                ConsoleEvent::MissionEnqueued(payload.into_waypoint()?)
            }
            StatusEnvelope::MissionDispatched(MissionRef { id }) => {
                ConsoleEvent::MissionDispatched { id }
            }
            StatusEnvelope::MissionEnded(EndedPayload { id, reason }) => {
                ConsoleEvent::MissionEnded { id, reason }
            }
            StatusEnvelope::MissionTimeoutRtl(MissionRef { id }) => {
                ConsoleEvent::MissionTimeoutRtl { id }
            }
            StatusEnvelope::DroneUpdate(state) => ConsoleEvent::DroneUpdate(state),
        })
    }
}

#[derive(Deserialize)]
struct MissionRef {
    #[serde(alias = "mission_id", deserialize_with = "opaque_id::deserialize")]
    id: String,
}

#[derive(Deserialize)]
struct EndedPayload {
    #[serde(alias = "mission_id", deserialize_with = "opaque_id::deserialize")]
    id: String,
    #[serde(default = "completed_reason")]
    reason: String,
}

fn completed_reason() -> String {
    MissionStatus::Completed.as_str().to_string()
}

/// Enqueue notices carry the waypoint either inline or under `waypoint`.
#[derive(Deserialize)]
struct EnqueuedPayload {
    #[serde(default)]
    waypoint: Option<MissionWaypoint>,
    #[serde(default, alias = "mission_id", deserialize_with = "opaque_id::deserialize_opt")]
    id: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default, alias = "altitude")]
    alt: Option<f64>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    created_at: Option<Timestamp>,
}

impl EnqueuedPayload {
    fn into_waypoint(self) -> Result<MissionWaypoint, DecodeError> {
        if let Some(mut waypoint) = self.waypoint {
            waypoint.status = MissionStatus::Queued;
            return Ok(waypoint);
        }
        match (self.id, self.lat, self.lon) {
            (Some(id), Some(lat), Some(lon)) => Ok(MissionWaypoint {
                id,
                lat,
                lon,
                alt: self.alt.unwrap_or_default(),
                created_at: self.created_at.unwrap_or_else(chrono::Utc::now),
                status: MissionStatus::Queued,
            }),
            _ => Err(DecodeError::IncompleteWaypoint),
        }
    }
}
