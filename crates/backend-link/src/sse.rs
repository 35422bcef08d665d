//! Server-Sent-Event subscriptions to the backend's `/realtime/<topic>` streams.
//!
//! A reader thread owns the HTTP response, parses the SSE framing, decodes each
//! message with the topic's decoder and forwards it over a channel. Events are
//! only handed to the caller from [`StreamSubscription::on_event`], on the
//! caller's thread, so the reconciler never sees concurrent mutation.

use std::{
    io::{ErrorKind, Read},
    mem,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use ops_core::{ConsoleEvent, Topic};
use reqwest::{
    blocking::{Client, Response},
    header::{ACCEPT, CACHE_CONTROL},
};
use tracing::{debug, info, trace, warn};

use crate::{config::BackendConfig, error::ApiError, thread::spawn_named};

const CHUNK_SIZE: usize = 16 * 1024;
/// Browser `EventSource` default before the server sends `retry:`.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Disconnected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubscriptionOptions {
    /// Delay before reopening after the transport drops. `None` stays
    /// disconnected.
    pub reconnect: Option<Duration>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            reconnect: Some(DEFAULT_RECONNECT_DELAY),
        }
    }
}

/// One dispatched SSE message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseMessage {
    /// Unnamed events and `message` events reach `onmessage` handlers.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Incremental parser for the `text/event-stream` format.
///
/// Lines end in `\n`, `\r\n` or a bare `\r`; one leading UTF-8 byte order mark
/// is dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    bom_checked: bool,
    /// Last line ended in `\r`; a `\n` opening the next chunk belongs to it.
    skip_lf: bool,
    data: String,
    has_data: bool,
    event: Option<String>,
    last_id: Option<String>,
    retry: Option<Duration>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every message completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        if !self.bom_checked {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Vec::new();
            }
            if self.buffer.starts_with(&BOM) {
                self.buffer.drain(..BOM.len());
            }
            self.bom_checked = true;
        }

        let mut messages = Vec::new();
        loop {
            if self.skip_lf && !self.buffer.is_empty() {
                if self.buffer[0] == b'\n' {
                    self.buffer.drain(..1);
                }
                self.skip_lf = false;
            }
            let Some(pos) = self.buffer.iter().position(|b| matches!(b, b'\n' | b'\r')) else {
                break;
            };
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.skip_lf = line.pop() == Some(b'\r');
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }
        messages
    }

    /// Reconnect delay requested by the server since the last call.
    pub fn take_retry(&mut self) -> Option<Duration> {
        self.retry.take()
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if !mem::take(&mut self.has_data) {
            return None;
        }
        Some(SseMessage {
            event,
            data: mem::take(&mut self.data),
            id: self.last_id.clone(),
        })
    }
}

enum Delivery {
    Event(ConsoleEvent),
    State(ConnectionState),
}

/// Handle to one open push topic.
pub struct StreamSubscription {
    topic: Topic,
    rx: Option<Receiver<Delivery>>,
    shutdown: Option<Sender<()>>,
    closed: Arc<AtomicBool>,
    state: ConnectionState,
    delivered: u64,
}

impl StreamSubscription {
    /// Open `GET <api_base>/realtime/<topic>` on a background reader.
    pub fn open(
        config: &BackendConfig,
        topic: Topic,
        options: SubscriptionOptions,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(None::<Duration>)
            .build()
            .map_err(ApiError::Client)?;
        let (tx, rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let closed = Arc::new(AtomicBool::new(false));

        let reader = StreamReader {
            topic,
            url: config.topic_url(topic),
            http,
            tx,
            shutdown: shutdown_rx,
            closed: closed.clone(),
            reconnect: options.reconnect,
        };
        let name = format!("sse-{}", topic.label());
        spawn_named(name.clone(), move || reader.run())
            .map_err(|source| ApiError::Spawn { name, source })?;

        Ok(Self {
            topic,
            rx: Some(rx),
            shutdown: Some(shutdown_tx),
            closed,
            state: ConnectionState::Connecting,
            delivered: 0,
        })
    }

    /// Hand every event delivered so far to `callback`, in arrival order.
    /// Returns how many events were handed over; always zero once closed.
    pub fn on_event<F>(&mut self, mut callback: F) -> usize
    where
        F: FnMut(ConsoleEvent),
    {
        let Some(rx) = self.rx.as_ref() else {
            return 0;
        };
        let mut handed = 0;
        while let Ok(delivery) = rx.try_recv() {
            match delivery {
                Delivery::State(state) => {
                    if state != self.state {
                        debug!(topic = self.topic.label(), state = state.label(), "stream state");
                    }
                    self.state = state;
                }
                Delivery::Event(event) => {
                    callback(event);
                    handed += 1;
                }
            }
        }
        self.delivered += handed as u64;
        handed
    }

    /// Stop delivery immediately; the reader exits at its next wakeup.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.take();
        self.rx.take();
        self.state = ConnectionState::Disconnected;
        debug!(topic = self.topic.label(), "subscription closed");
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Events handed to callbacks over the subscription's lifetime.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

enum ReadEnd {
    Closed,
    Eof,
    Failed(std::io::Error),
}

struct StreamReader {
    topic: Topic,
    url: String,
    http: Client,
    tx: Sender<Delivery>,
    shutdown: Receiver<()>,
    closed: Arc<AtomicBool>,
    reconnect: Option<Duration>,
}

impl StreamReader {
    fn run(self) {
        let mut delay = self.reconnect;
        loop {
            if !self.report(ConnectionState::Connecting) {
                return;
            }
            let request = self
                .http
                .get(&self.url)
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache");
            match request.send() {
                Ok(response) if response.status().is_success() => {
                    info!(url = %self.url, "connected to event stream");
                    if !self.report(ConnectionState::Open) {
                        return;
                    }
                    match self.pump(response, &mut delay) {
                        ReadEnd::Closed => return,
                        ReadEnd::Eof => info!(url = %self.url, "event stream ended"),
                        ReadEnd::Failed(err) => {
                            warn!(url = %self.url, error = %err, "event stream read failed")
                        }
                    }
                }
                Ok(response) => {
                    warn!(url = %self.url, status = %response.status(), "event stream refused")
                }
                Err(err) => warn!(url = %self.url, error = %err, "event stream unavailable"),
            }

            if !self.report(ConnectionState::Disconnected) {
                return;
            }
            let Some(wait) = delay else {
                return;
            };
            match self.shutdown.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
        }
    }

    fn pump(&self, mut response: Response, delay: &mut Option<Duration>) -> ReadEnd {
        let mut parser = SseParser::new();
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            match response.read(&mut chunk) {
                Ok(0) => return ReadEnd::Eof,
                Ok(n) => {
                    if self.is_closed() {
                        return ReadEnd::Closed;
                    }
                    for message in parser.feed(&chunk[..n]) {
                        if !self.deliver(message) {
                            return ReadEnd::Closed;
                        }
                    }
                    if let Some(retry) = parser.take_retry() {
                        if delay.is_some() {
                            *delay = Some(retry);
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return ReadEnd::Failed(err),
            }
        }
    }

    /// Decode and forward one message. Returns `false` once nobody listens.
    fn deliver(&self, message: SseMessage) -> bool {
        let topic = self.topic.label();
        if !message.is_message() {
            trace!(topic, event = ?message.event, "skipping named event");
            return true;
        }
        metrics::counter!("console_stream_messages_total", "topic" => topic).increment(1);
        match self.topic.decode(&message.data) {
            Ok(event) => self.tx.send(Delivery::Event(event)).is_ok() && !self.is_closed(),
            Err(err) => {
                metrics::counter!("console_decode_failures_total", "topic" => topic).increment(1);
                debug!(topic, error = %err, "dropping undecodable message");
                true
            }
        }
    }

    fn report(&self, state: ConnectionState) -> bool {
        !self.is_closed() && self.tx.send(Delivery::State(state)).is_ok()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_multiline_data_and_ignores_comments() {
        let mut parser = SseParser::new();
        let messages = parser.feed(b": keep-alive\n\ndata: first\ndata: second\n\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "first\nsecond");
        assert!(messages[0].is_message());
    }

    #[test]
    fn handles_split_chunks_and_crlf() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: 7\r\nda").is_empty());
        assert!(parser.feed(b"ta: {\"a\":1}\r\n").is_empty());
        let messages = parser.feed(b"\r\n");
        assert_eq!(
            messages,
            vec![SseMessage {
                event: None,
                data: "{\"a\":1}".into(),
                id: Some("7".into()),
            }]
        );
    }

    #[test]
    fn bare_carriage_returns_end_lines() {
        let mut parser = SseParser::new();
        let messages = parser.feed(b"data: a\rdata: b\r\r");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "a\nb");

        // CR and LF split across chunks still make one line ending.
        assert!(parser.feed(b"data: x\r").is_empty());
        let messages = parser.feed(b"\ndata: y\r\n\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "x\ny");
    }

    #[test]
    fn leading_byte_order_mark_is_dropped() {
        let mut parser = SseParser::new();
        assert!(parser.feed(&[0xEF]).is_empty());
        assert!(parser.feed(&[0xBB, 0xBF]).is_empty());
        let messages = parser.feed(b"event: status\ndata: z\n\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event.as_deref(), Some("status"));
        assert_eq!(messages[0].data, "z");

        let mut plain = SseParser::new();
        assert_eq!(plain.feed(b"data: q\n\n")[0].data, "q");
    }

    #[test]
    fn records_retry_and_named_events() {
        let mut parser = SseParser::new();
        let messages = parser.feed(b"retry: 500\n\nevent: error\ndata: boom\n\n");
        assert_eq!(parser.take_retry(), Some(Duration::from_millis(500)));
        assert_eq!(parser.take_retry(), None);
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_message());
    }

    #[test]
    fn blank_lines_without_data_dispatch_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: ping\n\n\n").is_empty());
        let messages = parser.feed(b"data:no-space\n\n");
        assert_eq!(messages[0].data, "no-space");
        assert_eq!(messages[0].event, None);
    }
}
