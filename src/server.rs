use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::capture::CapturedRequest;
use crate::constants::{HttpMethod, DEFAULT_WORKER_POOL_SIZE, ONE_KB, ONE_MB};
use crate::dispatcher::Dispatcher;
use crate::handler::{Handler, HandlerBuilder, HandlerKey};
use crate::request::parse_request;
use crate::response::TcpResponseWriter;
use crate::route::Route;

/// Embeddable HTTP server fixture. Owns the `Dispatcher` for its
/// lifetime; `handle()` stages handlers before `start()` freezes them.
pub struct Server {
    port: u16,
    worker_pool_size: usize,
    dispatcher: Arc<Dispatcher>,
    /// Handlers staged via `handle()` before `start()` freezes them into
    /// `dispatcher.handlers`. A plain `std::sync::Mutex<Handler>` per
    /// entry lets `HandlerBuilder` keep mutating it fluently right up
    /// until `start()`.
    staging: DashMap<HandlerKey, Arc<std::sync::Mutex<Handler>>>,
    listener_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    started: AtomicBool,
    /// Set once `start()` binds the listener. Lets callers pass `port =
    /// 0` (an ephemeral port, useful for running many fixture instances
    /// in parallel test suites) and then discover what was actually
    /// bound.
    local_addr: std::sync::Mutex<Option<std::net::SocketAddr>>,
}

impl Server {
    /// `worker_pool_size` defaults to 10.
    pub fn new(port: u16, worker_pool_size: Option<usize>) -> Arc<Self> {
        let worker_pool_size = worker_pool_size.unwrap_or(DEFAULT_WORKER_POOL_SIZE);
        Arc::new(Self {
            port,
            worker_pool_size,
            dispatcher: Arc::new(Dispatcher::new(worker_pool_size, None)),
            staging: DashMap::new(),
            listener_task: std::sync::Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            started: AtomicBool::new(false),
            local_addr: std::sync::Mutex::new(None),
        })
    }

    /// The address actually bound by `start()`. `None` before `start()`
    /// has run.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Registers a route/method/content-type combination and returns its
    /// builder.
    pub fn handle(
        &self,
        method: HttpMethod,
        resource: &str,
        content_type: Option<&str>,
    ) -> HandlerBuilder {
        let route = Route::compile(resource).expect("invalid route pattern");
        self.dispatcher
            .routes
            .write()
            .unwrap()
            .insert(route.clone());

        let key = HandlerKey::new(method, route, content_type.map(str::to_string));
        let handler = self
            .staging
            .entry(key)
            .or_insert_with(|| Arc::new(std::sync::Mutex::new(Handler::default())))
            .clone();
        HandlerBuilder::new(handler)
    }

    /// Snapshot of every captured request, oldest first.
    pub fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.dispatcher.captures.snapshot()
    }

    /// Dequeues the oldest captured request, FIFO.
    pub fn request(&self) -> Option<CapturedRequest> {
        self.dispatcher.captures.pop_front()
    }

    /// Sets the capture ring's capacity; `None` means unbounded.
    pub fn set_max_captured_requests(&self, n: Option<usize>) {
        self.dispatcher.captures.set_capacity(n);
    }

    /// Freezes staged handlers, registers trigger synthetic handlers,
    /// and starts accepting connections.
    pub async fn start(self: &Arc<Self>) -> std::io::Result<()> {
        self.freeze_handlers();

        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        let bound_addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap() = Some(bound_addr);
        tracing::info!(addr = %bound_addr, pool = self.worker_pool_size, "fixd server listening");

        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("fixd server shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        tracing::debug!(%peer, "accepted connection");
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, dispatcher).await {
                                tracing::debug!(error = %err, "connection closed with error");
                            }
                        });
                    }
                }
            }
        });

        *self.listener_task.lock().unwrap() = Some(handle);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Closes the listener, cancels every subscription and timer, and
    /// drains the executor.
    pub async fn stop(&self) {
        self.shutdown.notify_waiters();
        self.dispatcher.async_engine.shutdown().await;
        let handle = self.listener_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn freeze_handlers(&self) {
        for entry in self.staging.iter() {
            let key = entry.key().clone();
            let snapshot = entry.value().lock().unwrap().clone();

            if let Some(trigger_key) = snapshot.upon_trigger.clone() {
                self.dispatcher
                    .trigger_keys
                    .write()
                    .unwrap()
                    .insert(trigger_key.clone());
                self.dispatcher
                    .routes
                    .write()
                    .unwrap()
                    .insert(trigger_key.route.clone());
                self.dispatcher
                    .handlers
                    .entry(trigger_key)
                    .or_insert_with(|| Arc::new(Handler::trigger_stub()));
            }

            self.dispatcher.handlers.insert(key, Arc::new(snapshot));
        }
    }
}

/// Reads one HTTP/1.1 request off `stream` incrementally, stopping at
/// `parse_request`'s `None` (partial) rather than matching on a parse
/// error.
async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    dispatcher: Arc<Dispatcher>,
) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; ONE_KB * 8];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > ONE_MB {
            tracing::debug!("request exceeded 1MB, dropping connection");
            return Ok(());
        }
        match parse_request(&buffer) {
            Ok(Some(request)) => {
                let writer = Arc::new(TcpResponseWriter::new(stream));
                dispatcher.dispatch(request, writer).await;
                return Ok(());
            }
            Ok(None) => continue,
            Err(err) => {
                tracing::debug!(error = %err, "failed to parse request");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn handle_stages_a_route_before_start() {
        let server = Server::new(0, None);
        server
            .handle(HttpMethod::GET, "/", None)
            .with(200, "text/plain", "Hello");
        assert_eq!(server.staging.len(), 1);
        assert!(server.dispatcher.handlers.is_empty());
    }

    #[tokio::test]
    async fn freeze_handlers_populates_dispatcher_and_trigger_set() {
        let server = Server::new(0, None);
        server
            .handle(HttpMethod::GET, "/subscribe", None)
            .upon(HttpMethod::GET, "/broadcast/:message", None)
            .with(200, "text/plain", "message: :message");
        server.freeze_handlers();

        assert_eq!(server.dispatcher.handlers.len(), 2);
        assert_eq!(server.dispatcher.trigger_keys.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_max_captured_requests_is_forwarded() {
        let server = Server::new(0, None);
        server.set_max_captured_requests(Some(2));
        assert!(server.request().is_none());
    }

    #[tokio::test]
    async fn stop_before_start_does_not_panic() {
        let server = Server::new(0, None);
        tokio::time::timeout(Duration::from_millis(50), server.stop())
            .await
            .unwrap();
    }
}
