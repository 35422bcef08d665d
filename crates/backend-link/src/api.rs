//! Request/response endpoints and the outbound operator commands.

use ops_core::{AudioEvent, Detection, LogLine, MetricsSummary, MissionWaypoint};
use reqwest::{
    StatusCode,
    blocking::{Client, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{config::BackendConfig, error::ApiError};

/// Fewest arrivals the backend's TDOA solver accepts.
pub const MIN_TDOA_ARRIVALS: usize = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub sensor_id: String,
    /// Arrival delay relative to the first sensor, in seconds.
    pub delay: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TdoaSolution {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub used_sensors: Vec<String>,
    #[serde(default)]
    pub waypoint_id: Option<String>,
    #[serde(default)]
    pub queue_size: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EnqueueReceipt {
    #[serde(default)]
    pub queued: bool,
    pub waypoint: MissionWaypoint,
    #[serde(default)]
    pub queue_size: usize,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RtlAck {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize)]
struct EnqueueRequest {
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    altitude: Option<f64>,
}

#[derive(Serialize)]
struct SolveRequest<'a> {
    arrivals: &'a [Arrival],
}

#[derive(Deserialize)]
struct NextMission {
    #[serde(default)]
    waypoint: Option<MissionWaypoint>,
}

/// Blocking client for the backend's REST surface.
#[derive(Clone)]
pub struct ApiClient {
    config: BackendConfig,
    http: Client,
}

impl ApiClient {
    pub fn new(config: BackendConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn recent_detections(&self, limit: usize) -> Result<Vec<Detection>, ApiError> {
        self.get(&format!("/detections/recent?limit={}", limit.max(1)))
    }

    pub fn recent_events(&self, limit: usize) -> Result<Vec<AudioEvent>, ApiError> {
        self.get(&format!("/events/recent?limit={}", limit.max(1)))
    }

    pub fn recent_logs(&self, limit: usize) -> Result<Vec<LogLine>, ApiError> {
        self.get(&format!("/logs/recent?limit={}", limit.max(1)))
    }

    pub fn metrics_summary(&self) -> Result<MetricsSummary, ApiError> {
        self.get("/metrics/summary")
    }

    pub fn enqueue_mission(
        &self,
        lat: f64,
        lon: f64,
        altitude: Option<f64>,
    ) -> Result<EnqueueReceipt, ApiError> {
        self.post("/missions/enqueue", Some(&EnqueueRequest { lat, lon, altitude }))
    }

    /// Pop the next queued mission; `None` when the queue is empty.
    pub fn next_mission(&self) -> Result<Option<MissionWaypoint>, ApiError> {
        let url = self.config.endpoint("/missions/next");
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let next: NextMission = read_json(url, response)?;
        Ok(next.waypoint)
    }

    pub fn return_to_launch(&self) -> Result<RtlAck, ApiError> {
        self.post::<(), _>("/drone/rtl", None)
    }

    pub fn solve_tdoa(&self, arrivals: &[Arrival]) -> Result<TdoaSolution, ApiError> {
        if arrivals.len() < MIN_TDOA_ARRIVALS {
            return Err(ApiError::InvalidRequest(format!(
                "at least {MIN_TDOA_ARRIVALS} arrivals required, got {}",
                arrivals.len()
            )));
        }
        self.post("/tdoa/solve", Some(&SolveRequest { arrivals }))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.config.endpoint(path);
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        read_json(url, response)
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let url = self.config.endpoint(path);
        debug!(%url, "POST");
        let mut request = self.http.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;
        read_json(url, response)
    }
}

fn read_json<T: DeserializeOwned>(url: String, response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status { url, status });
    }
    let body = response.text().map_err(|source| ApiError::Transport {
        url: url.clone(),
        source,
    })?;
    serde_json::from_str(&body).map_err(|source| ApiError::Decode { url, source })
}
