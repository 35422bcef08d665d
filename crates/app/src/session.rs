//! The `watch` session: one thread owns the reconciler and the overlay, and
//! drains every subscription on a short frame tick.

use std::{
    fs,
    path::Path,
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use backend_link::{
    ApiClient, BackendConfig, FeedOptions, MjpegFeed, PollingSnapshotFetcher, StreamSubscription,
};
use crossbeam_channel::{after, never, select, tick};
use image::{DynamicImage, Rgba, RgbaImage, codecs::jpeg::JpegEncoder};
use metrics_exporter_prometheus::PrometheusHandle;
use ops_core::{ApplyOutcome, ConsoleEvent, EntityReconciler, MetricsSummary, Topic};
use overlay::{DrawReport, OverlayRenderer, ViewportMapper, scale_to_surface};
use tracing::{debug, info, info_span, warn};

use crate::{config::WatchConfig, telemetry};

const FRAME_INTERVAL: Duration = Duration::from_millis(50);
const BACKDROP: Rgba<u8> = Rgba([0, 0, 0, 255]);

pub(crate) fn run(backend: BackendConfig, config: WatchConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let metrics = match telemetry::init_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!("Prometheus recorder unavailable: {err:#}");
            None
        }
    };

    let span = info_span!("watch", api = %backend.api_base);
    let _entered = span.enter();

    let mut console = Console::new(backend, config)?;
    if console.config.seed {
        console.seed();
    }
    console.connect()?;
    let result = console.run_loop(&shutdown, metrics);
    console.shutdown();
    result
}

pub(crate) struct Console {
    backend: BackendConfig,
    config: WatchConfig,
    api: ApiClient,
    reconciler: EntityReconciler,
    viewport: ViewportMapper,
    renderer: OverlayRenderer,
    subscriptions: Vec<StreamSubscription>,
    poller: Option<PollingSnapshotFetcher<MetricsSummary>>,
    feed: Option<MjpegFeed>,
    drawn_revision: Option<u64>,
    last_frame: Option<Arc<RgbaImage>>,
    overlay_dirty: bool,
    ignored: u64,
}

impl Console {
    pub(crate) fn new(backend: BackendConfig, config: WatchConfig) -> Result<Self> {
        let api = ApiClient::new(backend.clone()).context("failed to build backend client")?;
        let (width, height) = config.surface;
        Ok(Self {
            reconciler: EntityReconciler::new(config.limits),
            viewport: ViewportMapper::new(width, height),
            renderer: OverlayRenderer::new(),
            subscriptions: Vec::new(),
            poller: None,
            feed: None,
            drawn_revision: None,
            last_frame: None,
            overlay_dirty: false,
            ignored: 0,
            backend,
            config,
            api,
        })
    }

    /// Load recent history so the console is not empty until the first push.
    pub(crate) fn seed(&mut self) {
        let limits = self.config.limits;
        match self.api.recent_detections(limits.detections) {
            Ok(detections) => self.reconciler.seed_detections(detections),
            Err(err) => warn!("Detection history unavailable: {err}"),
        }
        match self.api.recent_events(limits.audio_events) {
            Ok(events) => self.reconciler.seed_audio_events(events),
            Err(err) => warn!("Audio event history unavailable: {err}"),
        }
        match self.api.recent_logs(limits.logs) {
            Ok(logs) => self.reconciler.seed_logs(logs),
            Err(err) => warn!("Log history unavailable: {err}"),
        }
        let counts = self.reconciler.counts();
        info!(
            detections = counts.detections,
            audio_events = counts.audio_events,
            logs = counts.logs,
            "seeded from history"
        );
    }

    /// Open every push topic, the metrics poller and, when enabled, the video feed.
    pub(crate) fn connect(&mut self) -> Result<()> {
        for topic in Topic::ALL {
            let subscription =
                StreamSubscription::open(&self.backend, topic, self.config.subscription.clone())
                    .with_context(|| format!("failed to open {} stream", topic.label()))?;
            self.subscriptions.push(subscription);
        }

        let api = self.api.clone();
        let poller = PollingSnapshotFetcher::spawn("metrics", self.config.poll_interval, move || {
            api.metrics_summary()
        })
        .context("failed to start metrics poller")?;
        self.poller = Some(poller);

        if self.config.video {
            match MjpegFeed::spawn(self.backend.video_url.clone(), FeedOptions::default()) {
                Ok(feed) => self.feed = Some(feed),
                Err(err) => warn!("Video feed unavailable, drawing on a blank surface: {err}"),
            }
        }
        Ok(())
    }

    fn run_loop(
        &mut self,
        shutdown: &AtomicBool,
        metrics: Option<&'static PrometheusHandle>,
    ) -> Result<()> {
        let frames = tick(FRAME_INTERVAL);
        let status = tick(self.config.status_interval);
        let deadline = match self.config.run_for {
            Some(limit) => after(limit),
            None => never(),
        };

        while !shutdown.load(Ordering::SeqCst) {
            select! {
                recv(frames) -> _ => self.step(),
                recv(status) -> _ => self.report_status(metrics),
                recv(deadline) -> _ => {
                    info!("run time elapsed");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Drain pending events, follow the video, and repaint what changed.
    pub(crate) fn step(&mut self) {
        self.drain();
        self.follow_video();
        if let Some(report) = self.refresh_overlay() {
            debug!(boxes = report.boxes, skipped = report.skipped, "overlay redrawn");
        }
        self.publish_frame();
    }

    fn drain(&mut self) {
        let mut pending = Vec::new();
        for subscription in &mut self.subscriptions {
            subscription.on_event(|event| pending.push(event));
        }
        for event in pending {
            self.apply(event);
        }
    }

    pub(crate) fn apply(&mut self, event: ConsoleEvent) -> ApplyOutcome {
        let outcome = self.reconciler.apply(event);
        if let ApplyOutcome::Ignored(reason) = outcome {
            metrics::counter!("console_events_ignored_total", "reason" => reason.label())
                .increment(1);
            self.ignored += 1;
        }
        outcome
    }

    fn follow_video(&mut self) {
        let Some(frame) = self.feed.as_ref().and_then(MjpegFeed::latest_frame) else {
            return;
        };
        if self
            .last_frame
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, &frame))
        {
            return;
        }
        if self.config.follow_video {
            let (width, height) = frame.dimensions();
            self.resize(width, height);
        }
        self.last_frame = Some(frame);
        self.overlay_dirty = true;
    }

    /// Resize the displayed surface; the next refresh repaints the overlay.
    pub(crate) fn resize(&mut self, width: u32, height: u32) -> bool {
        let changed = self.viewport.resize(width, height);
        if changed {
            info!(width, height, "surface resized");
            self.drawn_revision = None;
        }
        changed
    }

    /// Repaint when the detection window or the surface changed since the last draw.
    pub(crate) fn refresh_overlay(&mut self) -> Option<DrawReport> {
        let revision = self.reconciler.detections().revision();
        if self.drawn_revision == Some(revision) {
            return None;
        }
        let report = self
            .renderer
            .draw(self.reconciler.overlay_detections(), &self.viewport);
        self.drawn_revision = Some(revision);
        self.overlay_dirty = true;
        Some(report)
    }

    /// Write the composed frame to the frame sink. A failed write is logged and
    /// retried on the next change.
    fn publish_frame(&mut self) {
        if !std::mem::take(&mut self.overlay_dirty) {
            return;
        }
        let Some(path) = self.config.frame_out.as_deref() else {
            return;
        };
        let frame = self.compose();
        if let Err(err) = write_jpeg(&frame, self.config.jpeg_quality, path) {
            metrics::counter!("console_frame_write_failures_total").increment(1);
            warn!("{err:#}");
        }
    }

    /// Current video frame scaled to the surface with the overlay on top.
    pub(crate) fn compose(&self) -> RgbaImage {
        let mut frame = match self.last_frame.as_deref() {
            Some(frame) => scale_to_surface(frame, &self.viewport),
            None => {
                let size = self.viewport.surface();
                RgbaImage::from_pixel(size.width, size.height, BACKDROP)
            }
        };
        self.renderer.composite(&mut frame);
        frame
    }

    fn report_status(&self, metrics: Option<&'static PrometheusHandle>) {
        let streams = self
            .subscriptions
            .iter()
            .map(|s| format!("{}={}", s.topic().label(), s.state().label()))
            .collect::<Vec<_>>()
            .join(" ");
        let counts = self.reconciler().counts();
        let totals = self
            .poller
            .as_ref()
            .and_then(PollingSnapshotFetcher::latest)
            .map(|summary| {
                let t = summary.totals;
                format!(
                    "det={} audio={} enq={} done={} rtl={}",
                    t.detections,
                    t.audio_events,
                    t.missions_enqueued,
                    t.missions_completed,
                    t.rtl_issued
                )
            })
            .unwrap_or_else(|| "pending".into());
        info!(
            streams = %streams,
            detections = counts.detections,
            boxes = counts.overlay_boxes,
            audio = counts.audio_events,
            mapped = counts.map_events,
            missions = counts.missions,
            active = counts.active_missions,
            drones = counts.drones,
            logs = counts.logs,
            ignored = self.ignored,
            totals = %totals,
            "status"
        );
        if let Some(newest) = self.reconciler.logs().newest() {
            debug!(message = %newest.message, "latest log");
        }

        if let (Some(handle), Some(path)) = (metrics, self.config.prometheus_out.as_deref()) {
            if let Err(err) = telemetry::write_prometheus(handle, path) {
                warn!("{err:#}");
            }
        }
    }

    pub(crate) fn reconciler(&self) -> &EntityReconciler {
        &self.reconciler
    }

    pub(crate) fn ignored(&self) -> u64 {
        self.ignored
    }

    pub(crate) fn shutdown(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.close();
        }
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(mut feed) = self.feed.take() {
            feed.stop();
        }
        info!(
            delivered = self.subscriptions.iter().map(|s| s.delivered()).sum::<u64>(),
            "console stopped"
        );
        self.subscriptions.clear();
    }
}

/// Encode as JPEG next to `path`, then rename over it so readers never see a
/// partial file.
fn write_jpeg(frame: &RgbaImage, quality: u8, path: &Path) -> Result<()> {
    let rgb = DynamicImage::ImageRgba8(frame.clone()).to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    let staging = path.with_extension("partial");
    fs::write(&staging, &buffer)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| format!("failed to replace {}", path.display()))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ops_core::{Detection, MissionWaypoint, NormalizedBox, WindowLimits};

    use super::*;

    fn config(frame_out: Option<std::path::PathBuf>) -> WatchConfig {
        WatchConfig {
            surface: (320, 180),
            follow_video: false,
            video: false,
            frame_out,
            jpeg_quality: 80,
            poll_interval: Duration::from_secs(3),
            status_interval: Duration::from_secs(5),
            subscription: Default::default(),
            limits: WindowLimits::default(),
            seed: false,
            prometheus_out: None,
            run_for: None,
        }
    }

    fn fire(x: f32) -> ConsoleEvent {
        ConsoleEvent::Detection(Detection {
            stream_id: "drone-1".into(),
            cls: "fire".into(),
            conf: 0.91,
            bbox: Some(NormalizedBox::new(x, 0.1, 0.2, 0.2)),
            ts: Utc::now(),
        })
    }

    #[test]
    fn overlay_redraws_only_when_detections_or_surface_change() {
        let mut console = Console::new(BackendConfig::default(), config(None)).unwrap();
        assert!(console.refresh_overlay().is_some());
        assert!(console.refresh_overlay().is_none());

        console.apply(fire(0.1));
        let report = console.refresh_overlay().unwrap();
        assert_eq!(report.labels, vec!["fire (0.91)".to_string()]);
        assert!(console.refresh_overlay().is_none());

        assert!(console.resize(640, 360));
        assert!(console.refresh_overlay().is_some());
        assert!(!console.resize(640, 360));
        assert!(console.refresh_overlay().is_none());
        assert_eq!(console.compose().dimensions(), (640, 360));
    }

    #[test]
    fn stale_mission_references_are_counted_not_applied() {
        let mut console = Console::new(BackendConfig::default(), config(None)).unwrap();
        let outcome = console.apply(ConsoleEvent::MissionDispatched { id: "ghost".into() });
        assert!(matches!(outcome, ApplyOutcome::Ignored(_)));
        assert_eq!(console.ignored(), 1);

        console.apply(ConsoleEvent::MissionEnqueued(MissionWaypoint {
            id: "m1".into(),
            lat: 45.0,
            lon: 16.0,
            alt: 30.0,
            created_at: Utc::now(),
            status: ops_core::MissionStatus::Queued,
        }));
        assert_eq!(console.reconciler().counts().active_missions, 1);
    }

    #[test]
    fn step_writes_annotated_frame_when_overlay_changes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("overlay.jpg");
        let mut console = Console::new(BackendConfig::default(), config(Some(out.clone()))).unwrap();

        console.apply(fire(0.3));
        console.step();
        let written = image::open(&out).unwrap();
        assert_eq!((written.width(), written.height()), (320, 180));

        fs::remove_file(&out).unwrap();
        console.step();
        assert!(!out.exists());
    }

    #[test]
    fn failed_frame_write_keeps_the_session_running() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("missing");
        let out = sink.join("overlay.jpg");
        let mut console = Console::new(BackendConfig::default(), config(Some(out.clone()))).unwrap();

        console.apply(fire(0.3));
        console.step();
        assert!(!out.exists());
        assert_eq!(console.renderer.draws(), 1);

        fs::create_dir(&sink).unwrap();
        console.apply(fire(0.5));
        console.step();
        assert_eq!(console.renderer.draws(), 2);
        assert!(image::open(&out).is_ok());
    }
}
