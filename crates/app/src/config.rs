//! Translation of `watch` flags into a validated `WatchConfig`.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use backend_link::{DEFAULT_POLL_INTERVAL, SubscriptionOptions};
use clap::Args;
use ops_core::{
    WindowLimits,
    reconciler::{
        DEFAULT_AUDIO_WINDOW, DEFAULT_DETECTION_WINDOW, DEFAULT_LOG_WINDOW, DEFAULT_MISSION_WINDOW,
    },
};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Optional tracing outputs.
#[derive(Clone, Debug, Default)]
pub struct TelemetryOptions {
    pub chrome_trace_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Size of the displayed video surface the overlay is drawn on.
    pub surface: (u32, u32),
    /// Resize the surface to the decoded video resolution when it changes.
    pub follow_video: bool,
    pub video: bool,
    pub frame_out: Option<PathBuf>,
    pub jpeg_quality: u8,
    pub poll_interval: Duration,
    pub status_interval: Duration,
    pub subscription: SubscriptionOptions,
    pub limits: WindowLimits,
    pub seed: bool,
    pub prometheus_out: Option<PathBuf>,
    /// Exit after this long instead of waiting for Ctrl+C.
    pub run_for: Option<Duration>,
}

#[derive(Clone, Debug, Args)]
pub struct WatchArgs {
    /// Overlay surface width in pixels.
    #[arg(long, value_name = "PX", default_value_t = 1280)]
    pub width: u32,
    /// Overlay surface height in pixels.
    #[arg(long, value_name = "PX", default_value_t = 720)]
    pub height: u32,
    /// Track the video resolution instead of a fixed surface.
    #[arg(long = "follow-video", action = clap::ArgAction::SetTrue)]
    pub follow_video: bool,
    /// Do not open the MJPEG video feed.
    #[arg(long = "no-video", action = clap::ArgAction::SetTrue)]
    pub no_video: bool,
    /// Write the annotated frame here whenever it changes.
    #[arg(long = "frame-out", value_name = "PATH")]
    pub frame_out: Option<PathBuf>,
    /// JPEG quality for `--frame-out` (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = 85)]
    pub jpeg_quality: u8,
    /// Metrics summary polling interval.
    #[arg(long = "poll-ms", value_name = "MS")]
    pub poll_ms: Option<u64>,
    /// Interval between status lines.
    #[arg(long = "status-secs", value_name = "SECS", default_value_t = 5)]
    pub status_secs: u64,
    /// Delay before reopening a dropped stream.
    #[arg(long = "reconnect-ms", value_name = "MS", default_value_t = 3000)]
    pub reconnect_ms: u64,
    /// Leave dropped streams disconnected.
    #[arg(long = "no-reconnect", action = clap::ArgAction::SetTrue)]
    pub no_reconnect: bool,
    /// Skip the initial REST snapshot.
    #[arg(long = "no-seed", action = clap::ArgAction::SetTrue)]
    pub no_seed: bool,
    #[arg(long = "detection-window", value_name = "N", default_value_t = DEFAULT_DETECTION_WINDOW)]
    pub detection_window: usize,
    #[arg(long = "audio-window", value_name = "N", default_value_t = DEFAULT_AUDIO_WINDOW)]
    pub audio_window: usize,
    #[arg(long = "mission-window", value_name = "N", default_value_t = DEFAULT_MISSION_WINDOW)]
    pub mission_window: usize,
    #[arg(long = "log-window", value_name = "N", default_value_t = DEFAULT_LOG_WINDOW)]
    pub log_window: usize,
    /// Write the Prometheus exposition here on every status line.
    #[arg(long = "prometheus-out", value_name = "PATH")]
    pub prometheus_out: Option<PathBuf>,
    /// Stop after this many seconds.
    #[arg(long = "for-secs", value_name = "SECS")]
    pub for_secs: Option<u64>,
}

impl TryFrom<WatchArgs> for WatchConfig {
    type Error = anyhow::Error;

    fn try_from(args: WatchArgs) -> Result<Self> {
        if args.width == 0 || args.height == 0 {
            bail!("Surface width and height must be positive integers");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let poll_interval = args
            .poll_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval < MIN_POLL_INTERVAL {
            bail!("--poll-ms must be at least {}", MIN_POLL_INTERVAL.as_millis());
        }
        if args.status_secs == 0 {
            bail!("--status-secs must be at least 1");
        }

        let limits = WindowLimits {
            detections: args.detection_window,
            audio_events: args.audio_window,
            missions: args.mission_window,
            logs: args.log_window,
        };
        if [
            limits.detections,
            limits.audio_events,
            limits.missions,
            limits.logs,
        ]
        .contains(&0)
        {
            bail!("Window capacities must be at least 1");
        }

        let subscription = SubscriptionOptions {
            reconnect: (!args.no_reconnect).then(|| Duration::from_millis(args.reconnect_ms)),
        };

        Ok(Self {
            surface: (args.width, args.height),
            follow_video: args.follow_video,
            video: !args.no_video,
            frame_out: args.frame_out,
            jpeg_quality: args.jpeg_quality,
            poll_interval,
            status_interval: Duration::from_secs(args.status_secs),
            subscription,
            limits,
            seed: !args.no_seed,
            prometheus_out: args.prometheus_out,
            run_for: args.for_secs.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        watch: WatchArgs,
    }

    fn parse(args: &[&str]) -> Result<WatchConfig> {
        let mut argv = vec!["watch"];
        argv.extend_from_slice(args);
        WatchConfig::try_from(Harness::try_parse_from(argv)?.watch)
    }

    #[test]
    fn defaults_match_console_windows() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.surface, (1280, 720));
        assert_eq!(config.limits, WindowLimits::default());
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(
            config.subscription.reconnect,
            Some(Duration::from_millis(3000))
        );
        assert!(config.video && config.seed);
    }

    #[test]
    fn rejects_degenerate_values() {
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--poll-ms", "10"]).is_err());
        assert!(parse(&["--log-window", "0"]).is_err());
        assert!(parse(&["--status-secs", "0"]).is_err());
    }

    #[test]
    fn no_reconnect_disables_retry() {
        let config = parse(&["--no-reconnect", "--for-secs", "2"]).unwrap();
        assert_eq!(config.subscription.reconnect, None);
        assert_eq!(config.run_for, Some(Duration::from_secs(2)));
    }
}
