//! Console state core: the entity model, the tagged event union decoded from the
//! backend's push topics, bounded recency windows, and the reconciler that owns
//! them.

pub mod events;
pub mod model;
pub mod reconciler;
pub mod window;

pub use events::{ConsoleEvent, DecodeError, Topic};
pub use model::{
    AudioEvent, Detection, DroneState, LogLine, MetricsSummary, MetricsTotals, MinuteBucket,
    MissionStatus, MissionWaypoint, NormalizedBox, Timestamp,
};
pub use reconciler::{ApplyOutcome, EntityCounts, EntityReconciler, IgnoreReason, WindowLimits};
pub use window::RecentWindow;
