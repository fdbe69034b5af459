use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::async_engine::AsyncEngine;
use crate::capture::{CapturedRequest, CaptureRing};
use crate::constants::SESSION_COOKIE_NAME;
use crate::error::DispatchError;
use crate::handler::{render_body, Handler, HandlerKey, TimingMode};
use crate::request::Request;
use crate::response::{ResponseHead, ResponseWriter};
use crate::route::RouteMap;
use crate::session::SessionStore;

/// Top-level per-request pipeline: capture → resolve → session → body
/// → write (sync or async). Owns every other component for the
/// server's lifetime.
pub struct Dispatcher {
    pub routes: RwLock<RouteMap>,
    pub handlers: DashMap<HandlerKey, Arc<Handler>>,
    /// Trigger routes are identified by membership in this set, not by
    /// inspecting the resolved handler.
    pub trigger_keys: RwLock<HashSet<HandlerKey>>,
    pub sessions: SessionStore,
    pub captures: CaptureRing,
    pub async_engine: Arc<AsyncEngine>,
}

impl Dispatcher {
    pub fn new(worker_pool_size: usize, max_captured_requests: Option<usize>) -> Self {
        Self {
            routes: RwLock::new(RouteMap::new()),
            handlers: DashMap::new(),
            trigger_keys: RwLock::new(HashSet::new()),
            sessions: SessionStore::new(),
            captures: CaptureRing::new(max_captured_requests),
            async_engine: Arc::new(AsyncEngine::new(worker_pool_size)),
        }
    }

    /// Resolves a path to its route. Method and content-type are not
    /// consulted here; they narrow the subsequent handler lookup.
    fn resolve_route(
        &self,
        request: &Request,
    ) -> Result<(crate::route::Route, std::collections::HashMap<String, String>), DispatchError>
    {
        let routes = self.routes.read().unwrap();
        routes
            .resolve(&request.path)
            .map(|(route, bindings)| (route.clone(), bindings))
            .ok_or(DispatchError::RouteNotFound)
    }

    /// Runs the full pipeline for one request against one response
    /// sink. Errors are never propagated to the caller: every
    /// `DispatchError` is translated into a response here, and
    /// `Ok(())` always returned once something has been written.
    pub async fn dispatch(&self, mut request: Request, writer: Arc<dyn ResponseWriter>) {
        self.captures.push(CapturedRequest::from_request(&request));

        let (route, bindings) = match self.resolve_route(&request) {
            Ok(pair) => pair,
            Err(err) => {
                self.write_error(writer.as_ref(), err).await;
                return;
            }
        };
        request.params = bindings;

        let key = HandlerKey::new(request.method.clone(), route, request.content_type.clone());

        let is_trigger_route = self.trigger_keys.read().unwrap().contains(&key);
        if is_trigger_route {
            let session = self.lookup_session(&request);
            self.async_engine
                .broadcast(&key, &request, session)
                .await;
            // fall through: the trigger URL still returns its own
            // (trivial) scripted response.
        }

        let handler = match self.handlers.get(&key) {
            Some(entry) => entry.clone(),
            None => {
                self.write_error(writer.as_ref(), DispatchError::MethodOrContentTypeMismatch)
                    .await;
                return;
            }
        };

        if handler.status_code.is_none() {
            self.write_error(writer.as_ref(), DispatchError::HandlerMisconfigured)
                .await;
            return;
        }

        let mut head = ResponseHead::new(handler.status_code.unwrap_or(200));
        if let Some(ct) = &handler.content_type {
            head.set_content_type(ct);
        }
        for (name, value) in &handler.headers {
            head.add_header(name, value);
        }

        let session = self.run_session_hook(&handler, &mut request, &mut head);

        if let Some(trigger) = handler.upon_trigger.clone() {
            // upon subscriber: headers commit lazily inside AsyncEngine
            // (see AsyncEngine::subscribe's doc comment) but still carry
            // whatever cookie/status/headers were assembled above.
            self.async_engine
                .subscribe(trigger, writer, handler.clone(), head.status_code, head.headers)
                .await;
            return;
        }

        match &handler.timing {
            TimingMode::Once => {
                let body = match render_body(&handler, &request, session).await {
                    Ok(body) => body,
                    Err(err) => {
                        self.write_error(writer.as_ref(), err).await;
                        return;
                    }
                };
                if writer.commit_headers(head.status_code, &head.headers).await.is_err() {
                    return;
                }
                let _ = writer.write_chunk(&body).await;
                let _ = writer.close().await;
            }
            TimingMode::AfterDelay(delay) => {
                if writer.commit_headers(head.status_code, &head.headers).await.is_err() {
                    return;
                }
                self.async_engine.schedule_after(
                    writer,
                    handler.clone(),
                    request,
                    session,
                    *delay,
                );
            }
            TimingMode::EveryInterval(period, count) => {
                if writer.commit_headers(head.status_code, &head.headers).await.is_err() {
                    return;
                }
                self.async_engine.schedule_every(
                    writer,
                    handler.clone(),
                    request,
                    session,
                    *period,
                    *count,
                );
            }
        }
    }

    /// Runs the handler's session hook, if any, and threads through the
    /// session cookie lifecycle: populates a new session when the hook
    /// yields attributes, or reattaches an existing valid session found
    /// via the `Fixd-Session` cookie.
    fn run_session_hook(
        &self,
        handler: &Handler,
        request: &mut Request,
        head: &mut ResponseHead,
    ) -> Option<Arc<crate::session::Session>> {
        if let Some(hook) = &handler.session_hook {
            let attrs = hook(request);
            if !attrs.is_empty() {
                let session = self.sessions.create(attrs);
                head.set_cookie(SESSION_COOKIE_NAME, session.id());
                return Some(session);
            }
        }
        self.lookup_session(request)
    }

    fn lookup_session(&self, request: &Request) -> Option<Arc<crate::session::Session>> {
        let cookie = request.cookie(SESSION_COOKIE_NAME)?;
        self.sessions.get(&cookie)
    }

    async fn write_error(&self, writer: &dyn ResponseWriter, err: DispatchError) {
        tracing::debug!(status = err.status_code(), error = %err, "dispatch error");
        let headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        if writer.commit_headers(err.status_code(), &headers).await.is_ok() {
            let _ = writer.close().await;
        }
    }
}
