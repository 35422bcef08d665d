//! Minimal HTTP/1.1 fixture server for exercising the blocking clients.

#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

pub struct Request {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Read one request head plus a `Content-Length` body.
pub fn read_request(stream: &mut TcpStream) -> Request {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).unwrap_or(0) == 0 {
            break;
        }
        raw.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&raw).into_owned();
    let mut lines = head.lines();
    let mut start = lines.next().unwrap_or_default().split_whitespace();
    let method = start.next().unwrap_or_default().to_string();
    let path = start.next().unwrap_or_default().to_string();
    let length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();
    Request {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

pub fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).unwrap();
    stream.flush().unwrap();
}

/// Write an event-stream response head; the body is close-delimited.
pub fn start_event_stream(stream: &mut TcpStream) {
    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        )
        .unwrap();
    stream.flush().unwrap();
}

pub fn send_event(stream: &mut TcpStream, data: &str) {
    stream.write_all(format!("data: {data}\n\n").as_bytes()).unwrap();
    stream.flush().unwrap();
}

/// Ask the client to reconnect after `millis` instead of its configured delay.
pub fn send_retry(stream: &mut TcpStream, millis: u64) {
    stream.write_all(format!("retry: {millis}\n\n").as_bytes()).unwrap();
    stream.flush().unwrap();
}

/// Bind an ephemeral port and hand each accepted connection to `handler`.
pub fn serve<F>(connections: usize, mut handler: F) -> String
where
    F: FnMut(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    thread::spawn(move || {
        for stream in listener.incoming().take(connections) {
            match stream {
                Ok(stream) => handler(stream),
                Err(_) => return,
            }
        }
    });
    base
}

pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
