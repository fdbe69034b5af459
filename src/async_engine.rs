use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::handler::{render_body, Handler, HandlerKey};
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::session::Session;

/// A held-open response awaiting trigger broadcasts. Receives jobs over
/// an unbounded channel so that writes enqueued by concurrent
/// `broadcast` calls stay strictly ordered per subscription, while the
/// actual write executes on the bounded worker pool.
pub struct Subscription {
    pub id: u64,
    pub trigger: HandlerKey,
    pub handler: Arc<Handler>,
    pub deadline: Option<Instant>,
    pub created_at: Instant,
    pub done: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<BroadcastJob>,
}

struct BroadcastJob {
    request: Request,
    session: Option<Arc<Session>>,
}

/// Timers for `after`/`every`, the subscriber registry, trigger
/// broadcast, and per-subscription timeout. The worker pool is a
/// `Semaphore`-gated spawn rather than a hand-rolled thread pool:
/// `tokio::spawn` tasks are cheap, and gating their body-write with a
/// bounded number of permits is the idiomatic way to cap concurrency on
/// top of full-featured `tokio`.
pub struct AsyncEngine {
    permits: Arc<Semaphore>,
    registry: DashMap<HandlerKey, AsyncMutex<Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
}

impl AsyncEngine {
    pub fn new(worker_pool_size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            registry: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// `AfterDelay(d)`: headers are already committed by the dispatcher;
    /// a one-shot timer writes the interpolated body and commits.
    /// Cancelled implicitly if the client disconnects: the write simply
    /// fails and is dropped silently.
    pub fn schedule_after(
        &self,
        writer: Arc<dyn ResponseWriter>,
        handler: Arc<Handler>,
        request: Request,
        session: Option<Arc<Session>>,
        delay: Duration,
    ) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Ok(_permit) = permits.acquire().await else {
                return;
            };
            match render_body(&handler, &request, session.clone()).await {
                Ok(body) => {
                    let _ = writer.write_chunk(&body).await;
                    let _ = writer.close().await;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "after() body render failed");
                    let _ = writer.close().await;
                }
            }
        });
    }

    /// `EveryInterval(period, count)`: headers committed immediately by
    /// the dispatcher; one interpolated chunk is written per tick.
    /// Ticks are anchored to start-of-dispatch via `interval_at`, not
    /// drift-corrected across writes. `count = None` streams until
    /// disconnect or server shutdown.
    pub fn schedule_every(
        &self,
        writer: Arc<dyn ResponseWriter>,
        handler: Arc<Handler>,
        request: Request,
        session: Option<Arc<Session>>,
        period: Duration,
        count: Option<u64>,
    ) {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u64 = 0;
            loop {
                ticker.tick().await;
                let Ok(_permit) = permits.acquire().await else {
                    break;
                };
                let body = match render_body(&handler, &request, session.clone()).await {
                    Ok(body) => body,
                    Err(err) => {
                        tracing::debug!(error = %err, "every() body render failed");
                        break;
                    }
                };
                if writer.write_chunk(&body).await.is_err() {
                    // client disconnected: stop silently.
                    break;
                }
                ticks += 1;
                if let Some(limit) = count {
                    if ticks >= limit {
                        break;
                    }
                }
            }
            let _ = writer.close().await;
        });
    }

    /// Registers a new `upon` subscription under `trigger`.
    ///
    /// An `upon` subscription's headers are notionally committed on
    /// subscribe, but an expired timeout needs to send a 408 status
    /// line instead: on a raw HTTP/1.1 connection those can't both be
    /// true once a 200 status line has already gone out. This resolves
    /// the conflict by committing headers lazily, at whichever comes
    /// first: the subscription's own first body write, or the timeout.
    /// A `claimed` flag (CAS'd by both the receiver loop and the timeout
    /// task) ensures exactly one of them gets to send the status line;
    /// a timeout that loses the race is a no-op; a response that has
    /// already streamed real content is not retroactively turned into a
    /// 408 (see DESIGN.md).
    pub async fn subscribe(
        self: &Arc<Self>,
        trigger: HandlerKey,
        writer: Arc<dyn ResponseWriter>,
        handler: Arc<Handler>,
        response_status: u16,
        response_headers: Vec<(String, String)>,
    ) -> Arc<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel::<BroadcastJob>();
        let done = Arc::new(AtomicBool::new(false));
        let claimed = Arc::new(AtomicBool::new(false));
        let deadline = handler.timeout.map(|t| Instant::now() + t);

        let subscription = Arc::new(Subscription {
            id,
            trigger: trigger.clone(),
            handler: handler.clone(),
            deadline,
            created_at: Instant::now(),
            done: done.clone(),
            sender: tx,
        });

        {
            let entry = self
                .registry
                .entry(trigger.clone())
                .or_insert_with(|| AsyncMutex::new(Vec::new()));
            entry.value().lock().await.push(subscription.clone());
        }

        let permits = self.permits.clone();
        let writer_for_recv = writer.clone();
        let handler_for_recv = handler.clone();
        let done_for_recv = done.clone();
        let claimed_for_recv = claimed.clone();
        let status_for_recv = response_status;
        let headers_for_recv = response_headers;
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if done_for_recv.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(_permit) = permits.acquire().await else {
                    break;
                };
                let body =
                    match render_body(&handler_for_recv, &job.request, job.session.clone())
                        .await
                    {
                        Ok(body) => body,
                        Err(err) => {
                            tracing::debug!(error = %err, "upon() body render failed");
                            continue;
                        }
                    };
                if claimed_for_recv
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    if writer_for_recv
                        .commit_headers(status_for_recv, &headers_for_recv)
                        .await
                        .is_err()
                    {
                        done_for_recv.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                if writer_for_recv.write_chunk(&body).await.is_err() {
                    done_for_recv.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        if let Some(deadline) = deadline {
            let engine = self.clone();
            let writer_for_timeout = writer;
            let trigger_for_timeout = trigger;
            let done_for_timeout = done;
            let claimed_for_timeout = claimed;
            let sub_id = id;
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if claimed_for_timeout
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    // a real broadcast already claimed the status line first.
                    return;
                }
                done_for_timeout.store(true, Ordering::SeqCst);
                let _ = writer_for_timeout
                    .commit_headers(408, &[("Content-Type".to_string(), "text/plain".to_string())])
                    .await;
                let _ = writer_for_timeout.close().await;
                engine.remove(&trigger_for_timeout, sub_id).await;
            });
        }

        subscription
    }

    /// Walks the subscriber set for `trigger` in insertion order and
    /// enqueues one job per subscription, using `request` (the
    /// triggering request) as the interpolation context. The registry
    /// lock is held only long enough to clone the current subscriber
    /// list, a consistent snapshot, so a subscriber added mid-broadcast
    /// may or may not see this round but is guaranteed to see the next
    /// one.
    pub async fn broadcast(
        &self,
        trigger: &HandlerKey,
        request: &Request,
        session: Option<Arc<Session>>,
    ) {
        let Some(entry) = self.registry.get(trigger) else {
            return;
        };
        let subscribers: Vec<Arc<Subscription>> = entry.lock().await.clone();
        drop(entry);
        for subscription in subscribers {
            if subscription.done.load(Ordering::SeqCst) {
                continue;
            }
            let _ = subscription.sender.send(BroadcastJob {
                request: request.clone(),
                session: session.clone(),
            });
        }
    }

    /// Removes a subscription from the registry (client disconnect,
    /// timeout, or server shutdown).
    pub async fn remove(&self, trigger: &HandlerKey, id: u64) {
        if let Some(entry) = self.registry.get(trigger) {
            entry.lock().await.retain(|s| s.id != id);
        }
    }

    /// Number of live subscribers for `trigger` (test/assertion helper).
    pub async fn subscriber_count(&self, trigger: &HandlerKey) -> usize {
        match self.registry.get(trigger) {
            Some(entry) => entry.lock().await.len(),
            None => 0,
        }
    }

    /// Cancels every live subscription; called by `Server::stop()`.
    pub async fn shutdown(&self) {
        for entry in self.registry.iter() {
            let guard = entry.lock().await;
            for subscription in guard.iter() {
                subscription.done.store(true, Ordering::SeqCst);
            }
        }
    }
}
