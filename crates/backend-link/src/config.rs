use std::time::Duration;

use ops_core::Topic;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_VIDEO_URL: &str = "http://127.0.0.1:8080/stream.mjpg";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend origin and video source, handed to each component at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub api_base: String,
    pub video_url: String,
    /// Whole-request timeout for request/response calls. Streams have none.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl BackendConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            video_url: DEFAULT_VIDEO_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_video_url(mut self, video_url: impl Into<String>) -> Self {
        self.video_url = video_url.into();
        self
    }

    /// Join `path` onto the base URL regardless of slashes on either side.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn topic_url(&self, topic: Topic) -> String {
        self.endpoint(&topic.path())
    }
}
