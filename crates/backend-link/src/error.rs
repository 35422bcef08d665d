use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to spawn {name} thread")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to build HTTP client for {source_uri}")]
    Client {
        source_uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to spawn {name} thread")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
