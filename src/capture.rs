use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::constants::HttpMethod;
use crate::request::Request;

/// Immutable snapshot of an observed request, taken before `resolve`.
/// Built from a live [`Request`] so later mutation of the live request
/// (e.g. route-parameter binding) cannot leak back into already-captured
/// history.
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub request_line: String,
    pub method: HttpMethod,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub timestamp: SystemTime,
}

impl CapturedRequest {
    pub fn from_request(request: &Request) -> Self {
        Self {
            request_line: request.request_line(),
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query_raw.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Bounded FIFO of captured requests. `capacity = None` means unbounded;
/// `Some(n)` evicts the oldest entries until the ring holds at most `n`.
#[derive(Debug, Default)]
pub struct CaptureRing {
    inner: Mutex<VecDeque<CapturedRequest>>,
    capacity: Mutex<Option<usize>>,
}

impl CaptureRing {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: Mutex::new(capacity),
        }
    }

    pub fn set_capacity(&self, capacity: Option<usize>) {
        *self.capacity.lock().unwrap() = capacity;
        self.trim();
    }

    /// Appends a snapshot, evicting the oldest entries if capacity is
    /// exceeded. Append-then-trim happens under one lock so the bound is
    /// never transiently violated for a concurrent reader.
    pub fn push(&self, request: CapturedRequest) {
        let mut queue = self.inner.lock().unwrap();
        queue.push_back(request);
        let capacity = *self.capacity.lock().unwrap();
        if let Some(cap) = capacity {
            while queue.len() > cap {
                queue.pop_front();
            }
        }
    }

    fn trim(&self) {
        let mut queue = self.inner.lock().unwrap();
        if let Some(cap) = *self.capacity.lock().unwrap() {
            while queue.len() > cap {
                queue.pop_front();
            }
        }
    }

    /// Snapshot view in arrival order, oldest first.
    pub fn snapshot(&self) -> Vec<CapturedRequest> {
        self.inner.lock().unwrap().iter().cloned().collect()
    }

    /// Dequeues the oldest captured request, FIFO.
    pub fn pop_front(&self) -> Option<CapturedRequest> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
