use std::collections::HashMap;
use std::sync::Arc;

use chrono::format::strftime::StrftimeItems;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::constants::get_status_text;
use crate::error::DispatchError;

/// The wire-facing collaborator: commits status/headers once, then
/// accepts zero or more body writes. Direct (`Once`) handlers write once
/// and commit; `every`/`upon` handlers write repeatedly onto an
/// already-committed response.
///
/// Splits header-commit from body writes so headers can flush before the
/// body is known and further chunks can stream afterward.
#[async_trait::async_trait]
pub trait ResponseWriter: Send + Sync {
    /// Writes the status line and headers. Must be called exactly once,
    /// before any `write_chunk`.
    async fn commit_headers(
        &self,
        status: u16,
        headers: &[(String, String)],
    ) -> Result<(), DispatchError>;

    /// Writes one body chunk. For a `Once` response this is the entire
    /// body; for `every`/`upon` this is one tick/broadcast's body.
    async fn write_chunk(&self, data: &[u8]) -> Result<(), DispatchError>;

    /// Flushes and, for streaming responses, signals no further chunks
    /// will arrive (best-effort on a raw HTTP/1.1 connection: we simply
    /// stop writing and let the connection close).
    async fn close(&self) -> Result<(), DispatchError>;
}

fn default_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let now = Utc::now();
    let fmt = StrftimeItems::new("%a, %d %b %Y %H:%M:%S GMT");
    headers.insert("Date".to_string(), now.format_with_items(fmt).to_string());
    headers
}

/// Builder for a response's status/headers/cookies before the body is
/// known to be ready.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status_code: u16) -> Self {
        let mut headers: Vec<(String, String)> = default_headers().into_iter().collect();
        headers.push(("Content-Type".to_string(), "text/plain".to_string()));
        Self {
            status_code,
            headers,
        }
    }

    pub fn set_status(&mut self, code: u16) {
        self.status_code = code;
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(existing) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            existing.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.add_header("Set-Cookie", &format!("{name}={value}; Path=/"));
    }
}

/// A [`ResponseWriter`] backed by a raw `tokio::net::TcpStream`, writing
/// the HTTP/1.1 status line and headers, then serializing concurrent
/// writers behind a per-connection mutex so writes to any single
/// response stay ordered.
pub struct TcpResponseWriter {
    stream: Arc<Mutex<TcpStream>>,
    headers_sent: std::sync::atomic::AtomicBool,
}

impl TcpResponseWriter {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            headers_sent: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl ResponseWriter for TcpResponseWriter {
    async fn commit_headers(
        &self,
        status: u16,
        headers: &[(String, String)],
    ) -> Result<(), DispatchError> {
        let status_line = format!(
            "HTTP/1.1 {} {}\r\n",
            status,
            get_status_text(status)
        );
        let header_lines: String = headers
            .iter()
            .map(|(k, v)| format!("{k}: {v}\r\n"))
            .collect();
        let mut stream = self.stream.lock().await;
        stream
            .write_all(status_line.as_bytes())
            .await
            .map_err(|e| DispatchError::WriteFailed(e.to_string()))?;
        stream
            .write_all(header_lines.as_bytes())
            .await
            .map_err(|e| DispatchError::WriteFailed(e.to_string()))?;
        stream
            .write_all(b"\r\n")
            .await
            .map_err(|e| DispatchError::WriteFailed(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| DispatchError::WriteFailed(e.to_string()))?;
        self.headers_sent
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn write_chunk(&self, data: &[u8]) -> Result<(), DispatchError> {
        let mut stream = self.stream.lock().await;
        stream
            .write_all(data)
            .await
            .map_err(|e| DispatchError::WriteFailed(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| DispatchError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DispatchError> {
        let mut stream = self.stream.lock().await;
        let _ = stream.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_head_carries_a_date_header() {
        let head = ResponseHead::new(200);
        assert!(head.headers.iter().any(|(k, _)| k == "Date"));
        assert_eq!(head.status_code, 200);
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut head = ResponseHead::new(200);
        head.set_header("content-type", "application/json");
        let matches: Vec<_> = head
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1, "application/json");
    }

    #[test]
    fn add_header_allows_duplicates() {
        let mut head = ResponseHead::new(200);
        head.add_header("X-Trace", "a");
        head.add_header("X-Trace", "b");
        let count = head
            .headers
            .iter()
            .filter(|(k, _)| k == "X-Trace")
            .count();
        assert_eq!(count, 2);
    }
}
