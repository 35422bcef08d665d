//! MJPEG frame feed behind the detection overlay.
//!
//! A reader thread pulls bytes from an HTTP multipart stream or a local file
//! and splits JPEG frames on their SOI/EOI markers. A decoder thread drops
//! stale frames, decodes the newest and publishes it for the console.

use std::{
    fs::File,
    io::{BufReader, Read},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use image::RgbaImage;
use reqwest::blocking::Client;
use tracing::{debug, info, trace, warn};

use crate::{error::FeedError, thread::spawn_named};

const CHUNK_SIZE: usize = 64 * 1024;
/// Bytes kept after a frame start while waiting for its end marker.
const MAX_PENDING_FRAME: usize = 32 * CHUNK_SIZE;
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Newest decoded frame; `None` until the first frame decodes.
pub type SharedFrame = Arc<Mutex<Option<Arc<RgbaImage>>>>;

#[derive(Clone, Debug)]
pub struct FeedOptions {
    pub reopen_delay: Duration,
    /// Pause after a source hits end-of-stream before reopening it.
    pub idle_sleep: Duration,
    pub connect_timeout: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            reopen_delay: Duration::from_secs(1),
            idle_sleep: Duration::from_millis(16),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct MjpegFeed {
    source: String,
    latest: SharedFrame,
    decoded: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
}

impl MjpegFeed {
    pub fn spawn(source: impl Into<String>, options: FeedOptions) -> Result<Self, FeedError> {
        let source = source.into();
        let client = if is_http(&source) {
            let client = Client::builder()
                .connect_timeout(options.connect_timeout)
                .timeout(None::<Duration>)
                .build()
                .map_err(|err| FeedError::Client {
                    source_uri: source.clone(),
                    source: err,
                })?;
            Some(client)
        } else {
            None
        };

        let latest: SharedFrame = Arc::new(Mutex::new(None));
        let decoded = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (raw_tx, raw_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let reader = FeedReader {
            source: source.clone(),
            client,
            options,
            tx: raw_tx,
            stop: stop.clone(),
            shutdown: shutdown_rx,
        };
        spawn_named("mjpeg-reader", move || reader.run()).map_err(|err| FeedError::Spawn {
            name: "mjpeg-reader".into(),
            source: err,
        })?;

        let slot = latest.clone();
        let counter = decoded.clone();
        spawn_named("mjpeg-decoder", move || run_decoder(raw_rx, slot, counter)).map_err(
            |err| FeedError::Spawn {
                name: "mjpeg-decoder".into(),
                source: err,
            },
        )?;

        Ok(Self {
            source,
            latest,
            decoded,
            stop,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn latest_frame(&self) -> Option<Arc<RgbaImage>> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Frames decoded since the feed started.
    pub fn frames_decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.take();
        debug!(source = %self.source, "mjpeg feed stopped");
    }
}

impl Drop for MjpegFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_http(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

struct FeedReader {
    source: String,
    client: Option<Client>,
    options: FeedOptions,
    tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    shutdown: Receiver<()>,
}

enum ReadEnd {
    Stopped,
    Eof,
    Failed,
}

impl FeedReader {
    fn run(self) {
        while !self.stopped() {
            let end = match self.client.as_ref() {
                Some(client) => match client.get(&self.source).send() {
                    Ok(response) if response.status().is_success() => {
                        info!(source = %self.source, "connected to MJPEG stream");
                        self.pump(BufReader::new(response))
                    }
                    Ok(response) => {
                        warn!(source = %self.source, status = %response.status(), "MJPEG stream refused");
                        ReadEnd::Failed
                    }
                    Err(err) => {
                        warn!(source = %self.source, error = %err, "waiting for MJPEG stream");
                        ReadEnd::Failed
                    }
                },
                None => match File::open(&self.source) {
                    Ok(file) => {
                        debug!(source = %self.source, "opened MJPEG file");
                        self.pump(BufReader::new(file))
                    }
                    Err(err) => {
                        warn!(source = %self.source, error = %err, "waiting for MJPEG file");
                        ReadEnd::Failed
                    }
                },
            };
            let wait = match end {
                ReadEnd::Stopped => return,
                ReadEnd::Eof => self.options.idle_sleep,
                ReadEnd::Failed => self.options.reopen_delay,
            };
            if !self.wait(wait) {
                return;
            }
        }
    }

    fn pump<R: Read>(&self, mut reader: R) -> ReadEnd {
        let mut buffer = Vec::with_capacity(CHUNK_SIZE * 2);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            if self.stopped() {
                return ReadEnd::Stopped;
            }
            match reader.read(&mut chunk) {
                Ok(0) => {
                    trace!(source = %self.source, "MJPEG source at end of stream");
                    return ReadEnd::Eof;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    while let Some(frame) = extract_frame(&mut buffer) {
                        trace!(bytes = frame.len(), "extracted MJPEG frame");
                        if self.tx.send(frame).is_err() {
                            return ReadEnd::Stopped;
                        }
                    }
                }
                Err(err) => {
                    warn!(source = %self.source, error = %err, "MJPEG read error");
                    return ReadEnd::Failed;
                }
            }
        }
    }

    /// Sleep for `delay` unless the feed is stopped first.
    fn wait(&self, delay: Duration) -> bool {
        matches!(
            self.shutdown.recv_timeout(delay),
            Err(RecvTimeoutError::Timeout)
        )
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

fn run_decoder(rx: Receiver<Vec<u8>>, latest: SharedFrame, decoded: Arc<AtomicU64>) {
    while let Ok(mut frame) = rx.recv() {
        while let Ok(newer) = rx.try_recv() {
            frame = newer;
        }
        match image::load_from_memory(&frame) {
            Ok(dynamic) => {
                let rgba = Arc::new(dynamic.into_rgba8());
                match latest.lock() {
                    Ok(mut guard) => *guard = Some(rgba),
                    Err(poisoned) => *poisoned.into_inner() = Some(rgba),
                }
                decoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => warn!(bytes = frame.len(), error = %err, "failed to decode MJPEG frame"),
        }
    }
}

/// Pop the first complete JPEG from `buffer`, discarding bytes before SOI.
fn extract_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let Some(start) = find_marker(buffer, &SOI) else {
        if buffer.len() > CHUNK_SIZE {
            buffer.clear();
        }
        return None;
    };
    if start > 0 {
        buffer.drain(..start);
    }

    let Some(end) = find_marker(&buffer[SOI.len()..], &EOI) else {
        if buffer.len() > MAX_PENDING_FRAME {
            // Truncated frame: resync on the newest start marker if it fits.
            match rfind_marker(buffer, &SOI) {
                Some(last) if last > 0 && buffer.len() - last <= MAX_PENDING_FRAME => {
                    buffer.drain(..last);
                }
                _ => buffer.clear(),
            }
        }
        return None;
    };
    let end = end + SOI.len();
    let frame_end = end + EOI.len();
    Some(buffer.drain(..frame_end).collect())
}

fn find_marker(buffer: &[u8], marker: &[u8]) -> Option<usize> {
    buffer
        .windows(marker.len())
        .position(|window| window == marker)
}

fn rfind_marker(buffer: &[u8], marker: &[u8]) -> Option<usize> {
    buffer
        .windows(marker.len())
        .rposition(|window| window == marker)
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, io::Write, time::Instant};

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40])));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    #[test]
    fn splits_frames_across_boundary_noise() {
        let mut buffer = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        buffer.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        buffer.extend_from_slice(b"\r\n--frame\r\n");
        buffer.extend_from_slice(&[0xFF, 0xD8, 4]);

        let frame = extract_frame(&mut buffer).unwrap();
        assert_eq!(frame, vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        assert!(extract_frame(&mut buffer).is_none());

        buffer.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(
            extract_frame(&mut buffer).unwrap(),
            vec![0xFF, 0xD8, 4, 0xFF, 0xD9]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn markerless_garbage_is_bounded() {
        let mut buffer = vec![0u8; CHUNK_SIZE + 1];
        assert!(extract_frame(&mut buffer).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn unterminated_frame_is_bounded() {
        let mut buffer = SOI.to_vec();
        let chunk = vec![0u8; CHUNK_SIZE];
        for _ in 0..200 {
            buffer.extend_from_slice(&chunk);
            assert!(extract_frame(&mut buffer).is_none());
            assert!(buffer.len() <= MAX_PENDING_FRAME);
        }
    }

    #[test]
    fn resyncs_on_next_frame_after_truncated_one() {
        let mut buffer = SOI.to_vec();
        buffer.extend(std::iter::repeat_n(0u8, MAX_PENDING_FRAME));
        buffer.extend_from_slice(&[0xFF, 0xD8, 7, 8]);
        assert!(extract_frame(&mut buffer).is_none());
        assert_eq!(buffer, vec![0xFF, 0xD8, 7, 8]);

        buffer.extend_from_slice(&EOI);
        assert_eq!(
            extract_frame(&mut buffer).unwrap(),
            vec![0xFF, 0xD8, 7, 8, 0xFF, 0xD9]
        );
    }

    #[test]
    fn file_source_yields_decoded_frames() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&jpeg(16, 8)).unwrap();
        file.write_all(&jpeg(16, 8)).unwrap();
        file.flush().unwrap();

        let mut feed = MjpegFeed::spawn(
            file.path().to_string_lossy().into_owned(),
            FeedOptions::default(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while feed.latest_frame().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let frame = feed.latest_frame().expect("no frame decoded");
        assert_eq!(frame.dimensions(), (16, 8));
        assert!(feed.frames_decoded() >= 1);
        feed.stop();
    }
}
