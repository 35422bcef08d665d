//! One-shot subcommands: outbound operator commands and snapshot queries.

use std::io::Write;

use anyhow::{Context, Result, bail};
use backend_link::{ApiClient, EnqueueReceipt, RtlAck, TdoaSolution};
use ops_core::{AudioEvent, Detection, LogLine, MetricsSummary, MissionWaypoint};
use tracing::info;

use crate::cli::{Command, RecentKind};

pub(crate) fn run(command: Command, api: &ApiClient, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Watch(_) => bail!("watch runs as a console session"),
        Command::Enqueue { lat, lon, altitude } => {
            let receipt = api
                .enqueue_mission(lat, lon, altitude)
                .context("enqueue failed")?;
            info!(id = %receipt.waypoint.id, "mission enqueued");
            write_receipt(out, &receipt)
        }
        Command::NextMission => {
            let next = api.next_mission().context("next-mission failed")?;
            write_next(out, next.as_ref())
        }
        Command::Rtl => {
            let ack = api.return_to_launch().context("return-to-launch failed")?;
            write_rtl(out, &ack)
        }
        Command::TdoaSolve { arrivals } => {
            let solution = api.solve_tdoa(&arrivals).context("TDOA solve failed")?;
            write_solution(out, &solution)
        }
        Command::Metrics { json } => {
            let summary = api.metrics_summary().context("metrics summary failed")?;
            if json {
                serde_json::to_writer_pretty(&mut *out, &summary)?;
                writeln!(out)?;
                Ok(())
            } else {
                write_metrics(out, &summary)
            }
        }
        Command::Recent { kind, limit } => match kind {
            RecentKind::Detections => {
                let rows = api.recent_detections(limit).context("detection history failed")?;
                write_detections(out, &rows)
            }
            RecentKind::Events => {
                let rows = api.recent_events(limit).context("event history failed")?;
                write_events(out, &rows)
            }
            RecentKind::Logs => {
                let rows = api.recent_logs(limit).context("log history failed")?;
                write_logs(out, &rows)
            }
        },
    }
}

fn write_receipt(out: &mut impl Write, receipt: &EnqueueReceipt) -> Result<()> {
    let wp = &receipt.waypoint;
    writeln!(
        out,
        "queued mission {} at {:.6}, {:.6} alt {:.1} m (queue size {})",
        wp.id, wp.lat, wp.lon, wp.alt, receipt.queue_size
    )?;
    Ok(())
}

fn write_next(out: &mut impl Write, next: Option<&MissionWaypoint>) -> Result<()> {
    match next {
        Some(wp) => writeln!(
            out,
            "next mission {} at {:.6}, {:.6} alt {:.1} m",
            wp.id, wp.lat, wp.lon, wp.alt
        )?,
        None => writeln!(out, "mission queue is empty")?,
    }
    Ok(())
}

fn write_rtl(out: &mut impl Write, ack: &RtlAck) -> Result<()> {
    match ack.message.as_deref() {
        Some(message) => writeln!(out, "rtl {}: {message}", ack.status)?,
        None => writeln!(out, "rtl {}", ack.status)?,
    }
    Ok(())
}

fn write_solution(out: &mut impl Write, solution: &TdoaSolution) -> Result<()> {
    writeln!(
        out,
        "source at {:.6}, {:.6} from {}",
        solution.lat,
        solution.lon,
        solution.used_sensors.join(", ")
    )?;
    if let Some(id) = solution.waypoint_id.as_deref() {
        writeln!(out, "queued as mission {id}")?;
    }
    Ok(())
}

fn write_metrics(out: &mut impl Write, summary: &MetricsSummary) -> Result<()> {
    let t = &summary.totals;
    writeln!(out, "generated {}", summary.generated_at.to_rfc3339())?;
    writeln!(
        out,
        "totals  detections={} audio_events={} missions_enqueued={} missions_completed={} rtl_issued={}",
        t.detections, t.audio_events, t.missions_enqueued, t.missions_completed, t.rtl_issued
    )?;
    for bucket in &summary.series {
        let c = &bucket.counts;
        writeln!(
            out,
            "{}  det={} audio={} enq={} done={} rtl={}",
            bucket.ts.format("%H:%M"),
            c.detections,
            c.audio_events,
            c.missions_enqueued,
            c.missions_completed,
            c.rtl_issued
        )?;
    }
    Ok(())
}

fn write_detections(out: &mut impl Write, rows: &[Detection]) -> Result<()> {
    for detection in rows {
        writeln!(out, "{}", detection.ticker_line())?;
    }
    Ok(())
}

fn write_events(out: &mut impl Write, rows: &[AudioEvent]) -> Result<()> {
    for event in rows {
        let place = match event.coordinates() {
            Some((lat, lon)) => format!("{lat:.5}, {lon:.5}"),
            None => "no fix".into(),
        };
        let verdict = match event.accepted {
            Some(true) => " accepted",
            Some(false) => " rejected",
            None => "",
        };
        writeln!(
            out,
            "{}  #{} {} p(help)={:.2} {place}{verdict}",
            event.ts.format("%H:%M:%S"),
            event.id,
            event.sensor_id,
            event.prob_help
        )?;
    }
    Ok(())
}

fn write_logs(out: &mut impl Write, rows: &[LogLine]) -> Result<()> {
    for line in rows {
        let level = line.level.as_deref().unwrap_or("-");
        match line.ts {
            Some(ts) => writeln!(out, "{} [{level}] {}", ts.format("%H:%M:%S"), line.message)?,
            None => writeln!(out, "[{level}] {}", line.message)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ops_core::{MetricsTotals, MinuteBucket, MissionStatus};

    use super::*;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn empty_queue_is_reported_plainly() {
        assert_eq!(render(|out| write_next(out, None)), "mission queue is empty\n");
        let wp = MissionWaypoint {
            id: "m7".into(),
            lat: 45.5,
            lon: 16.25,
            alt: 30.0,
            created_at: Utc::now(),
            status: MissionStatus::Queued,
        };
        assert_eq!(
            render(|out| write_next(out, Some(&wp))),
            "next mission m7 at 45.500000, 16.250000 alt 30.0 m\n"
        );
    }

    #[test]
    fn metrics_lists_totals_then_buckets() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 7, 0).unwrap();
        let summary = MetricsSummary {
            totals: MetricsTotals {
                detections: 12,
                rtl_issued: 1,
                ..Default::default()
            },
            series: vec![MinuteBucket {
                ts,
                counts: MetricsTotals {
                    detections: 3,
                    ..Default::default()
                },
            }],
            generated_at: ts,
        };
        let text = render(|out| write_metrics(out, &summary));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("detections=12") && lines[1].contains("rtl_issued=1"));
        assert_eq!(lines[2], "10:07  det=3 audio=0 enq=0 done=0 rtl=0");
    }

    #[test]
    fn logs_without_timestamp_keep_message() {
        let rows = vec![LogLine::from_raw("[WARN] battery low"), LogLine::from_raw("plain")];
        assert_eq!(
            render(|out| write_logs(out, &rows)),
            "[WARN] battery low\n[-] plain\n"
        );
    }

    #[test]
    fn rtl_ack_includes_message_when_present() {
        let ack = RtlAck {
            status: "ok".into(),
            message: Some("returning".into()),
        };
        assert_eq!(render(|out| write_rtl(out, &ack)), "rtl ok: returning\n");
    }
}
