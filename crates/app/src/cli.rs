use std::{path::PathBuf, time::Duration};

use backend_link::{Arrival, BackendConfig, DEFAULT_API_BASE, DEFAULT_VIDEO_URL};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{TelemetryOptions, WatchArgs};

#[derive(Debug, Parser)]
#[command(
    name = "rescue-console",
    version,
    about = "Operator console for the drone rescue backend"
)]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH", global = true)]
    pub chrome_trace: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn telemetry(&self) -> TelemetryOptions {
        TelemetryOptions {
            chrome_trace_path: self.chrome_trace.clone(),
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct BackendArgs {
    /// Base URL of the rescue backend.
    #[arg(
        long = "api-base",
        value_name = "URL",
        env = "RESCUE_API_BASE",
        default_value = DEFAULT_API_BASE,
        global = true
    )]
    pub api_base: String,
    /// MJPEG video source (URL or file).
    #[arg(
        long = "video-url",
        value_name = "URL",
        env = "RESCUE_VIDEO_URL",
        default_value = DEFAULT_VIDEO_URL,
        global = true
    )]
    pub video_url: String,
    /// Request timeout for REST calls.
    #[arg(long = "timeout-secs", value_name = "SECS", default_value_t = 10, global = true)]
    pub timeout_secs: u64,
}

impl BackendArgs {
    pub fn to_config(&self) -> BackendConfig {
        let mut config = BackendConfig::new(&self.api_base).with_video_url(&self.video_url);
        config.request_timeout = Duration::from_secs(self.timeout_secs.max(1));
        config
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow every push topic and keep the console state live.
    Watch(WatchArgs),
    /// Queue a mission waypoint.
    Enqueue {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// Flight altitude in meters; the backend default applies when absent.
        #[arg(long)]
        altitude: Option<f64>,
    },
    /// Pop the next queued mission.
    NextMission,
    /// Order the drone to return to launch.
    Rtl,
    /// Locate a sound source from sensor arrival delays.
    TdoaSolve {
        /// Sensor arrival as SENSOR=DELAY_SECONDS; repeat at least three times.
        #[arg(long = "arrival", value_name = "SENSOR=DELAY", value_parser = parse_arrival, required = true)]
        arrivals: Vec<Arrival>,
    },
    /// Print the aggregate metrics summary.
    Metrics {
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Print a recent-history snapshot.
    Recent {
        #[arg(value_enum)]
        kind: RecentKind,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RecentKind {
    Detections,
    Events,
    Logs,
}

fn parse_arrival(raw: &str) -> Result<Arrival, String> {
    let (sensor, delay) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SENSOR=DELAY, got `{raw}`"))?;
    let sensor = sensor.trim();
    if sensor.is_empty() {
        return Err("sensor id must not be empty".into());
    }
    let delay = delay
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid delay `{delay}`: {err}"))?;
    if !delay.is_finite() {
        return Err(format!("delay must be finite, got `{delay}`"));
    }
    Ok(Arrival {
        sensor_id: sensor.to_string(),
        delay,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrivals_parse_from_pairs() {
        let cli = Cli::try_parse_from([
            "rescue-console",
            "tdoa-solve",
            "--arrival",
            "s1=0",
            "--arrival",
            "s2=0.012",
            "--arrival",
            "s3=-0.004",
        ])
        .unwrap();
        let Command::TdoaSolve { arrivals } = cli.command else {
            panic!("expected tdoa-solve");
        };
        assert_eq!(arrivals.len(), 3);
        assert_eq!(arrivals[2].sensor_id, "s3");
        assert_eq!(arrivals[2].delay, -0.004);
        assert!(parse_arrival("s1").is_err());
        assert!(parse_arrival("=1").is_err());
    }

    #[test]
    fn enqueue_accepts_southern_and_western_coordinates() {
        let cli = Cli::try_parse_from([
            "rescue-console",
            "--api-base",
            "http://backend:9000/",
            "enqueue",
            "--lat",
            "-33.86",
            "--lon",
            "-70.65",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Enqueue { lat, lon, altitude: None } if lat == -33.86 && lon == -70.65
        ));
        assert_eq!(
            cli.backend.to_config().endpoint("/missions/enqueue"),
            "http://backend:9000/missions/enqueue"
        );
    }

    #[test]
    fn recent_takes_kind_and_limit() {
        let cli =
            Cli::try_parse_from(["rescue-console", "recent", "logs", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Recent {
                kind: RecentKind::Logs,
                limit: 5
            }
        ));
    }
}
