//! Everything that talks to the rescue backend or the video source.
//!
//! - `config`: explicit backend origin and video source.
//! - `sse`: push topic subscriptions and the SSE wire parser.
//! - `api`: request/response endpoints and outbound commands.
//! - `poller`: fixed-interval snapshot polling.
//! - `video`: MJPEG frame feed for the overlay surface.

pub use api::{ApiClient, Arrival, EnqueueReceipt, RtlAck, TdoaSolution};
pub use config::{BackendConfig, DEFAULT_API_BASE, DEFAULT_VIDEO_URL};
pub use error::{ApiError, FeedError};
pub use poller::{DEFAULT_POLL_INTERVAL, PollingSnapshotFetcher, SharedSnapshot};
pub use sse::{
    ConnectionState, DEFAULT_RECONNECT_DELAY, SseMessage, SseParser, StreamSubscription,
    SubscriptionOptions,
};
pub use video::{FeedOptions, MjpegFeed, SharedFrame};

mod api;
mod config;
mod error;
mod poller;
mod sse;
mod thread;
mod video;
