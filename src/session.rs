use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use rand::RngCore;

use crate::request::Request;

/// Server-side session state keyed by the `Fixd-Session` cookie.
///
/// `valid` is the hard atomicity invariant: once [`Session::invalidate`]
/// flips it, every subsequent dispatch that reads it must observe
/// `false`, regardless of thread. `AtomicBool` gives that for free; the
/// attribute map is a plain `DashMap`.
#[derive(Debug)]
pub struct Session {
    id: String,
    valid: AtomicBool,
    attrs: DashMap<String, String>,
}

impl Session {
    fn new(id: String, attrs: HashMap<String, String>) -> Self {
        let map = DashMap::new();
        for (k, v) in attrs {
            map.insert(k, v);
        }
        Self {
            id,
            valid: AtomicBool::new(true),
            attrs: map,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Atomically marks the session invalid. Exposed to user-supplied
    /// custom handlers.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.attrs.get(name).map(|v| v.clone())
    }

    pub fn set(&self, name: &str, value: &str) {
        self.attrs.insert(name.to_string(), value.to_string());
    }
}

/// Generates a 128-bit, URL-safe opaque session id.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Concurrent session registry. A `DashMap` gives concurrent
/// read/write access without a single global lock serializing unrelated
/// sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Allocates and registers a fresh session, returning its id for the
    /// `Fixd-Session` cookie.
    pub fn create(&self, attrs: HashMap<String, String>) -> Arc<Session> {
        let id = generate_session_id();
        let session = Arc::new(Session::new(id.clone(), attrs));
        self.sessions.insert(id, session.clone());
        session
    }

    /// Looks up a session by cookie value. If it is present but
    /// invalid, it is evicted lazily and `None` is returned.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|s| s.clone())?;
        if session.is_valid() {
            Some(session)
        } else {
            self.sessions.remove(id);
            None
        }
    }
}

/// A session hook runs on every request resolved to its handler; the
/// dispatcher only allocates a session when the returned map is
/// non-empty.
pub type SessionHookFn = Arc<dyn Fn(&Request) -> HashMap<String, String> + Send + Sync>;

/// Copies all path-parameter bindings into the session.
pub fn path_param_hook() -> SessionHookFn {
    Arc::new(|request: &Request| request.params.clone())
}

/// Copies all request parameters (query + form body) into the session.
pub fn request_param_hook() -> SessionHookFn {
    Arc::new(|request: &Request| request.all_request_params())
}
