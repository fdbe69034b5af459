use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

/// Minimal raw-socket HTTP client for driving a running [`fixd::Server`]
/// in tests. No HTTP client crate is pulled in: requests are small,
/// fixed strings and responses are read directly off the socket so
/// streamed (`every`/`upon`) bodies can be observed chunk-by-chunk
/// rather than only once the connection closes.
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub async fn send(addr: std::net::SocketAddr, request: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let raw = read_until_close(&mut stream, Duration::from_secs(2)).await;
    parse_response(&raw)
}

/// Sends `request` then keeps the connection open, collecting whatever
/// bytes arrive within `window` (used for `every`/`upon` responses that
/// never close on their own).
pub async fn send_and_collect(
    addr: std::net::SocketAddr,
    request: &str,
    window: Duration,
) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let raw = read_for(&mut stream, window).await;
    parse_response(&raw)
}

pub async fn open(addr: std::net::SocketAddr, request: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

pub async fn collect_from(stream: &mut TcpStream, window: Duration) -> RawResponse {
    let raw = read_for(stream, window).await;
    parse_response(&raw)
}

async fn read_for(stream: &mut TcpStream, window: Duration) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            _ => break,
        }
    }
    buf
}

async fn read_until_close(stream: &mut TcpStream, cap: Duration) -> Vec<u8> {
    read_for(stream, cap).await
}

fn parse_response(raw: &[u8]) -> RawResponse {
    let marker = b"\r\n\r\n";
    let split = raw
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("response missing header/body separator");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let body = raw[split + marker.len()..].to_vec();

    let mut lines = head.lines();
    let status_line = lines.next().expect("missing status line");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .expect("malformed status line")
        .parse()
        .expect("status code not numeric");

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    RawResponse {
        status,
        headers,
        body,
    }
}
