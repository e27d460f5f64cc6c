//! Retrieval scheduler: batches and deduplicates fragment requests.
//!
//! Sessions push [`FragmentId`]s into one shared queue and get a oneshot
//! handle back. A fixed pool of workers drains the queue, groups up to
//! `batch_size` ids that arrive within `wait` of the first, and makes a single
//! backend call per group. Identical ids requested while one is queued or in
//! flight are merged, so each fragment is fetched once however many sessions
//! want it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bloombits_core::types::FragmentId;

use crate::backend::FragmentBackend;
use crate::error::{MatchError, RetrievalError};

/// Completion handle for one requested fragment.
pub type FragmentReceiver = oneshot::Receiver<Result<Bytes, RetrievalError>>;
type FragmentSender = oneshot::Sender<Result<Bytes, RetrievalError>>;

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrent retrieval workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum ids per backend call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long a worker keeps collecting after the first id (milliseconds).
    #[serde(default)]
    pub wait_ms: u64,
}

fn default_workers() -> usize {
    3
}
fn default_batch_size() -> usize {
    16
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            wait_ms: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.workers == 0 {
            return Err(MatchError::Config("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(MatchError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

/// Identifies the session that owns a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Counter snapshot returned by [`Scheduler::metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetrics {
    /// Fragment requests accepted.
    pub requests: u64,
    /// Requests merged into an already queued or in-flight id.
    pub deduplicated: u64,
    /// Backend calls made.
    pub batches: u64,
    /// Results handed to waiters.
    pub delivered: u64,
    /// Backend calls that failed.
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    deduplicated: AtomicU64,
    batches: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
}

struct Pending {
    waiters: Vec<(SessionId, FragmentSender)>,
    in_flight: bool,
}

#[derive(Default)]
struct PendingSet {
    entries: HashMap<FragmentId, Pending>,
    closed: bool,
}

struct Shared {
    backend: Arc<dyn FragmentBackend>,
    pending: Mutex<PendingSet>,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, PendingSet> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the still-wanted ids of a drained group as in flight.
    fn claim(&self, ids: Vec<FragmentId>) -> Vec<FragmentId> {
        let mut set = self.lock();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(pending) = set.entries.get_mut(&id) else {
                continue;
            };
            if pending.in_flight {
                continue;
            }
            if pending.waiters.is_empty() {
                set.entries.remove(&id);
                continue;
            }
            pending.in_flight = true;
            claimed.push(id);
        }
        claimed
    }

    fn deliver(&self, ids: &[FragmentId], result: Result<Vec<Option<Bytes>>, RetrievalError>) {
        let result = match result {
            Ok(fragments) if fragments.len() != ids.len() => Err(RetrievalError::Backend(format!(
                "backend returned {} fragments for {} ids",
                fragments.len(),
                ids.len()
            ))),
            other => other,
        };
        let mut set = self.lock();
        match result {
            Ok(fragments) => {
                for (id, fragment) in ids.iter().zip(fragments) {
                    let outcome = fragment.ok_or(RetrievalError::Unavailable {
                        bit: id.bit,
                        section: id.section,
                    });
                    self.notify(set.entries.remove(id), &outcome);
                }
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, ids = ids.len(), "fragment retrieval failed");
                for id in ids {
                    self.notify(set.entries.remove(id), &Err(e.clone()));
                }
            }
        }
    }

    fn notify(&self, pending: Option<Pending>, outcome: &Result<Bytes, RetrievalError>) {
        let Some(pending) = pending else { return };
        for (_, tx) in pending.waiters {
            if tx.send(outcome.clone()).is_ok() {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Shared retrieval scheduler. Cheap to share behind an `Arc`.
pub struct Scheduler {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<FragmentId>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_session: AtomicU64,
}

impl Scheduler {
    /// Spawn the worker pool on the current tokio runtime.
    pub fn start(backend: Arc<dyn FragmentBackend>, config: SchedulerConfig) -> Result<Arc<Self>, MatchError> {
        config.validate()?;
        let (queue, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            backend,
            pending: Mutex::new(PendingSet::default()),
            counters: Counters::default(),
        });
        let cancel = CancellationToken::new();

        let workers = (0..config.workers)
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    shared.clone(),
                    rx.clone(),
                    cancel.clone(),
                    config.batch_size,
                    config.wait(),
                ))
            })
            .collect();

        debug!(workers = config.workers, batch_size = config.batch_size, wait_ms = config.wait_ms, "retrieval scheduler started");
        Ok(Arc::new(Self {
            shared,
            queue,
            cancel,
            workers: Mutex::new(workers),
            next_session: AtomicU64::new(1),
        }))
    }

    /// Allocate an id for a new session.
    pub fn new_session(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Request one fragment on behalf of `session`.
    pub fn request(&self, session: SessionId, id: FragmentId) -> FragmentReceiver {
        let (tx, rx) = oneshot::channel();
        self.shared.counters.requests.fetch_add(1, Ordering::Relaxed);

        let mut set = self.shared.lock();
        if set.closed {
            let _ = tx.send(Err(RetrievalError::Closed));
            return rx;
        }
        if let Some(pending) = set.entries.get_mut(&id) {
            self.shared.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            pending.waiters.push((session, tx));
            return rx;
        }
        if self.queue.send(id).is_err() {
            let _ = tx.send(Err(RetrievalError::Closed));
            return rx;
        }
        set.entries.insert(
            id,
            Pending {
                waiters: vec![(session, tx)],
                in_flight: false,
            },
        );
        rx
    }

    /// Request several fragments, returning handles in the same order.
    pub fn request_all(&self, session: SessionId, ids: &[FragmentId]) -> Vec<FragmentReceiver> {
        ids.iter().map(|&id| self.request(session, id)).collect()
    }

    /// Drop every pending registration of `session`. In-flight calls are not aborted.
    pub fn release(&self, session: SessionId) {
        let mut set = self.shared.lock();
        let mut released = 0usize;
        set.entries.retain(|_, pending| {
            let before = pending.waiters.len();
            pending.waiters.retain(|(owner, _)| *owner != session);
            released += before - pending.waiters.len();
            pending.in_flight || !pending.waiters.is_empty()
        });
        if released > 0 {
            debug!(?session, released, "session requests released");
        }
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let c = &self.shared.counters;
        SchedulerMetrics {
            requests: c.requests.load(Ordering::Relaxed),
            deduplicated: c.deduplicated.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Stop the workers and fail every outstanding request with `Closed`.
    pub async fn close(&self) {
        self.cancel.cancel();
        let outstanding: Vec<Pending> = {
            let mut set = self.shared.lock();
            set.closed = true;
            set.entries.drain().map(|(_, pending)| pending).collect()
        };
        for pending in outstanding {
            self.shared.notify(Some(pending), &Err(RetrievalError::Closed));
        }

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "retrieval worker failed");
            }
        }
        debug!("retrieval scheduler closed");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn worker_loop(
    index: usize,
    shared: Arc<Shared>,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<FragmentId>>>,
    cancel: CancellationToken,
    batch_size: usize,
    wait: Duration,
) {
    loop {
        let ids = {
            let mut rx = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                rx = queue.lock() => rx,
            };
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                id = rx.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };
            let mut ids = vec![first];
            if wait.is_zero() {
                while ids.len() < batch_size {
                    match rx.try_recv() {
                        Ok(id) => ids.push(id),
                        Err(_) => break,
                    }
                }
            } else {
                let deadline = tokio::time::sleep(wait);
                tokio::pin!(deadline);
                while ids.len() < batch_size {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = &mut deadline => break,
                        id = rx.recv() => match id {
                            Some(id) => ids.push(id),
                            None => break,
                        },
                    }
                }
            }
            ids
        };

        let claimed = shared.claim(ids);
        if claimed.is_empty() {
            continue;
        }
        shared.counters.batches.fetch_add(1, Ordering::Relaxed);
        debug!(worker = index, ids = claimed.len(), "retrieving fragment batch");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = shared.backend.retrieve(&claimed) => result,
        };
        shared.deliver(&claimed, result);
    }
    debug!(worker = index, "retrieval worker stopped");
}
