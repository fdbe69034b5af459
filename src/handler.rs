use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::HttpMethod;
use crate::error::DispatchError;
use crate::interpolator::Interpolator;
use crate::request::Request;
use crate::route::Route;
use crate::session::{Session, SessionHookFn};
use tokio::io::AsyncReadExt;

/// Async function that returns `T`, used as the custom-handler callback
/// type for `with(customHandler)`.
pub type AsyncFuncReturn<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Identifies a registered handler: `(method, route, content-type?)`.
/// Equality and hash derive from all three; `Route`'s own
/// `PartialEq`/`Hash` already key off the original pattern string, so
/// two `HandlerKey`s with equal patterns but differently-compiled
/// segments still collide correctly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub method: HttpMethod,
    pub route: Route,
    pub content_type: Option<String>,
}

impl HandlerKey {
    pub fn new(method: HttpMethod, route: Route, content_type: Option<String>) -> Self {
        Self {
            method,
            route,
            content_type,
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content_type {
            Some(ct) => write!(f, "{} {} ({ct})", self.method, self.route.pattern()),
            None => write!(f, "{} {}", self.method, self.route.pattern()),
        }
    }
}

/// Body of a value a custom handler hands back to the dispatcher.
/// `Interpreted` is the only variant the interpolator touches; raw
/// bytes, strings, and streams pass through untouched.
pub enum ResponseBody {
    Empty,
    Raw(Vec<u8>),
    Str(String),
    Interpreted(String),
    Stream(Pin<Box<dyn tokio::io::AsyncRead + Send>>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => write!(f, "Empty"),
            ResponseBody::Raw(b) => write!(f, "Raw({} bytes)", b.len()),
            ResponseBody::Str(s) => write!(f, "Str({s:?})"),
            ResponseBody::Interpreted(s) => write!(f, "Interpreted({s:?})"),
            ResponseBody::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// What a custom handler (`HandlerBody::Custom`) returns: status,
/// content-type, extra headers, and a body variant.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_raw_body(mut self, body: Vec<u8>) -> Self {
        self.body = ResponseBody::Raw(body);
        self
    }

    pub fn with_str_body(mut self, body: impl Into<String>) -> Self {
        self.body = ResponseBody::Str(body.into());
        self
    }

    /// Sets a body that *is* run through the interpolator on send. This
    /// is the only way a custom handler's body gets interpolated; the
    /// default for raw/string bodies is verbatim.
    pub fn with_interpreted_body(mut self, body: impl Into<String>) -> Self {
        self.body = ResponseBody::Interpreted(body.into());
        self
    }

    pub fn with_stream_body(mut self, body: Pin<Box<dyn tokio::io::AsyncRead + Send>>) -> Self {
        self.body = ResponseBody::Stream(body);
        self
    }
}

pub type CustomHandlerFn =
    Arc<dyn Fn(Request, Option<Arc<Session>>) -> AsyncFuncReturn<HttpResponse> + Send + Sync>;

/// The body a `Handler` carries. `Scripted` is what `HandlerBuilder::with`
/// produces: a literal template string, always run through the
/// interpolator on send. `Custom` delegates entirely to user code.
#[derive(Clone)]
pub enum HandlerBody {
    None,
    Scripted(String),
    Custom(CustomHandlerFn),
}

impl fmt::Debug for HandlerBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerBody::None => write!(f, "None"),
            HandlerBody::Scripted(s) => write!(f, "Scripted({s:?})"),
            HandlerBody::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Response timing strategy. The dispatcher pattern-matches this to
/// pick a write strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimingMode {
    Once,
    AfterDelay(Duration),
    /// `count = None` streams until client disconnect or server stop.
    EveryInterval(Duration, Option<u64>),
}

/// A declarative response script. Built by [`HandlerBuilder`] and frozen
/// into an `Arc<Handler>` at `Server::start()`, excluding concurrent
/// mutation by construction rather than by runtime check.
#[derive(Clone)]
pub struct Handler {
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub body: HandlerBody,
    pub headers: Vec<(String, String)>,
    pub session_hook: Option<SessionHookFn>,
    pub timing: TimingMode,
    pub upon_trigger: Option<HandlerKey>,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("status_code", &self.status_code)
            .field("content_type", &self.content_type)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("session_hook", &self.session_hook.is_some())
            .field("timing", &self.timing)
            .field("upon_trigger", &self.upon_trigger)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self {
            status_code: None,
            content_type: None,
            body: HandlerBody::None,
            headers: Vec::new(),
            session_hook: None,
            timing: TimingMode::Once,
            upon_trigger: None,
            timeout: None,
        }
    }
}

impl Handler {
    /// A handler is async iff its timing isn't `Once` or it subscribes
    /// to a trigger.
    pub fn is_async(&self) -> bool {
        !matches!(self.timing, TimingMode::Once) || self.upon_trigger.is_some()
    }

    /// The trivial 200/text/plain/empty handler registered at a trigger
    /// route so the trigger URL itself is addressable.
    pub fn trigger_stub() -> Self {
        Self {
            status_code: Some(200),
            content_type: Some("text/plain".to_string()),
            body: HandlerBody::Scripted(String::new()),
            ..Default::default()
        }
    }
}

/// Renders a handler's body against a request and optional session.
/// Shared by the dispatcher's synchronous `Once` path and every
/// `AsyncEngine` write strategy, so body rendering is defined exactly
/// once. Takes an owned `Arc<Session>` (rather than a borrow) because
/// `HandlerBody::Custom` hands the session to user-supplied code, which
/// may stash it or call `invalidate()` well after this call returns.
pub async fn render_body(
    handler: &Handler,
    request: &Request,
    session: Option<Arc<Session>>,
) -> Result<Vec<u8>, DispatchError> {
    match &handler.body {
        HandlerBody::None => Ok(Vec::new()),
        HandlerBody::Scripted(template) => {
            Ok(Interpolator::expand(template, request, session.as_deref()).into_bytes())
        }
        HandlerBody::Custom(custom_fn) => {
            let response = custom_fn(request.clone(), session.clone()).await;
            match response.body {
                ResponseBody::Empty => Ok(Vec::new()),
                ResponseBody::Raw(bytes) => Ok(bytes),
                ResponseBody::Str(s) => Ok(s.into_bytes()),
                ResponseBody::Interpreted(template) => {
                    Ok(Interpolator::expand(&template, request, session.as_deref()).into_bytes())
                }
                ResponseBody::Stream(mut reader) => {
                    let mut buf = Vec::new();
                    reader
                        .read_to_end(&mut buf)
                        .await
                        .map_err(|e| DispatchError::InternalError(e.to_string()))?;
                    Ok(buf)
                }
            }
        }
    }
}

/// Fluent builder backing a registered [`Handler`]. Mutates an
/// `Arc<Mutex<Handler>>` shared with the route map entry created at
/// `Server::handle()` time; the dispatcher only ever sees the frozen
/// snapshot taken at `Server::start()`.
pub struct HandlerBuilder {
    pub(crate) inner: Arc<std::sync::Mutex<Handler>>,
}

impl HandlerBuilder {
    pub(crate) fn new(inner: Arc<std::sync::Mutex<Handler>>) -> Self {
        Self { inner }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Handler> {
        self.inner.lock().unwrap()
    }

    /// Literal scripted body, interpreter-expanded on send.
    pub fn with(&self, status: u16, content_type: &str, body: impl Into<String>) -> &Self {
        let mut handler = self.lock();
        handler.status_code = Some(status);
        handler.content_type = Some(content_type.to_string());
        handler.body = HandlerBody::Scripted(body.into());
        drop(handler);
        self
    }

    /// Delegates to user code returning an [`HttpResponse`].
    pub fn with_custom(&self, handler_fn: CustomHandlerFn) -> &Self {
        self.lock().body = HandlerBody::Custom(handler_fn);
        self
    }

    pub fn with_header(&self, name: &str, value: &str) -> &Self {
        self.lock().headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_session_handler(&self, hook: SessionHookFn) -> &Self {
        self.lock().session_hook = Some(hook);
        self
    }

    pub fn after(&self, delay: Duration) -> &Self {
        self.lock().timing = TimingMode::AfterDelay(delay);
        self
    }

    pub fn every(&self, period: Duration, count: Option<u64>) -> &Self {
        self.lock().timing = TimingMode::EveryInterval(period, count);
        self
    }

    pub fn upon(&self, method: HttpMethod, resource: &str, content_type: Option<&str>) -> &Self {
        let route = Route::compile(resource).expect("invalid upon() route pattern");
        self.lock().upon_trigger = Some(HandlerKey::new(
            method,
            route,
            content_type.map(str::to_string),
        ));
        self
    }

    pub fn with_timeout(&self, timeout: Duration) -> &Self {
        self.lock().timeout = Some(timeout);
        self
    }

    pub fn snapshot(&self) -> Handler {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_handler_without_trigger_is_sync() {
        let builder = HandlerBuilder::new(Arc::new(std::sync::Mutex::new(Handler::default())));
        builder.with(200, "text/plain", "hi");
        assert!(!builder.snapshot().is_async());
    }

    #[test]
    fn every_handler_is_async() {
        let builder = HandlerBuilder::new(Arc::new(std::sync::Mutex::new(Handler::default())));
        builder.with(200, "text/plain", "hi").every(Duration::from_millis(200), Some(2));
        assert!(builder.snapshot().is_async());
    }

    #[test]
    fn upon_sets_trigger_key() {
        let builder = HandlerBuilder::new(Arc::new(std::sync::Mutex::new(Handler::default())));
        builder.upon(HttpMethod::GET, "/broadcast/:message", None);
        let snapshot = builder.snapshot();
        assert!(snapshot.is_async());
        assert_eq!(
            snapshot.upon_trigger.unwrap().route.pattern(),
            "/broadcast/:message"
        );
    }
}
