//! Per-key serialized task queue.
//!
//! Each key owns a FIFO list of entries drained by at most one worker task.
//! Different keys are drained by different workers and interleave freely.
//! Once a key's list is empty and its worker has exited, the key is removed
//! from the map, so memory stays bounded across many short-lived keys.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::QueueConfig;

/// Error returned by a queued task.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed unit of queued work.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

type FailureHook<K> = Arc<dyn Fn(&K, &str, &EntryFailure) + Send + Sync>;

/// Error type for queue operations.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The registry no longer accepts new keys.
    #[error("Queue is shutting down")]
    ShuttingDown,
}

/// Why a queued entry failed.
#[derive(Debug)]
pub enum EntryFailure {
    /// The task returned an error.
    Error(TaskError),
    /// The task panicked.
    Panicked(String),
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "{e}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// A labelled unit of work.
pub struct QueueEntry {
    label: String,
    work: TaskFuture,
    cancel: CancellationToken,
}

impl QueueEntry {
    /// Create an entry from a future.
    pub fn new<F>(label: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            work: work.boxed(),
            cancel: CancellationToken::new(),
        }
    }

    /// Entry label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ticket that can cancel this entry.
    #[must_use]
    pub fn ticket(&self) -> EntryTicket {
        EntryTicket {
            label: self.label.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEntry")
            .field("label", &self.label)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Handle for cancelling one queued entry.
#[derive(Debug, Clone)]
pub struct EntryTicket {
    label: String,
    cancel: CancellationToken,
}

impl EntryTicket {
    /// Cancel the entry. A pending entry is skipped; a running entry's
    /// future is dropped. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Entry label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Snapshot of registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Keys currently present in the map.
    pub active_queues: usize,
    /// Keys with a running worker.
    pub busy_queues: usize,
    /// Entries waiting across all keys.
    pub pending_entries: usize,
    /// Entries that finished successfully.
    pub completed: u64,
    /// Entries that failed or panicked.
    pub failures: u64,
}

/// Result of a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// True if every worker finished within the grace period.
    pub drained: bool,
    /// Entries still waiting when shutdown returned.
    pub pending_entries: usize,
}

struct KeyState {
    pending: VecDeque<QueueEntry>,
    active: bool,
    last_activity: Instant,
    consecutive_failures: u32,
}

impl KeyState {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            active: false,
            last_activity: Instant::now(),
            consecutive_failures: 0,
        }
    }
}

struct Inner<K> {
    states: Mutex<HashMap<K, KeyState>>,
    closed: AtomicBool,
    idle_after: Duration,
    tracker: TaskTracker,
    completed: AtomicU64,
    failures: AtomicU64,
    on_failure: OnceLock<FailureHook<K>>,
}

impl<K> Inner<K> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, KeyState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of per-key serial queues.
///
/// Cloning is cheap and every clone shares the same registry.
pub struct KeyedQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for KeyedQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for KeyedQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedQueue")
            .field("keys", &self.inner.lock().len())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<K> KeyedQueue<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Create a registry that evicts keys idle for `idle_after`.
    #[must_use]
    pub fn new(idle_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                idle_after,
                tracker: TaskTracker::new(),
                completed: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                on_failure: OnceLock::new(),
            }),
        }
    }

    /// Create a registry from the `[queue]` config section.
    #[must_use]
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.idle_evict())
    }

    /// Register a hook called after every failed entry. Only the first hook
    /// registered is kept.
    #[must_use]
    pub fn on_failure<F>(self, hook: F) -> Self
    where
        F: Fn(&K, &str, &EntryFailure) + Send + Sync + 'static,
    {
        if self.inner.on_failure.set(Arc::new(hook)).is_err() {
            tracing::debug!("Failure hook already registered, ignoring");
        }
        self
    }

    /// Get the queue for a key, creating its state if needed.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ShuttingDown` for a key not already present once
    /// shutdown has started.
    pub fn get_or_create(&self, key: K) -> Result<QueueHandle<K>, QueueError> {
        {
            let mut states = self.inner.lock();
            if self.is_closed() && !states.contains_key(&key) {
                return Err(QueueError::ShuttingDown);
            }
            states
                .entry(key.clone())
                .or_insert_with(KeyState::new)
                .last_activity = Instant::now();
        }
        Ok(QueueHandle {
            queue: self.clone(),
            key,
        })
    }

    /// Returns true once shutdown has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Consecutive failures recorded for a key, if it is present.
    #[must_use]
    pub fn consecutive_failures(&self, key: &K) -> Option<u32> {
        self.inner.lock().get(key).map(|s| s.consecutive_failures)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let states = self.inner.lock();
        QueueStats {
            active_queues: states.len(),
            busy_queues: states.values().filter(|s| s.active).count(),
            pending_entries: states.values().map(|s| s.pending.len()).sum(),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
        }
    }

    /// Evict keys with no work that have been idle past the threshold.
    ///
    /// Returns the number of keys removed.
    pub fn cleanup(&self) -> usize {
        let idle_after = self.inner.idle_after;
        let mut states = self.inner.lock();
        let before = states.len();
        states.retain(|_, s| {
            s.active || !s.pending.is_empty() || s.last_activity.elapsed() < idle_after
        });
        let removed = before - states.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = states.len(), "Evicted idle queues");
        }
        removed
    }

    /// Stop accepting new keys and wait up to `grace` for workers to finish.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.tracker.close();

        let drained = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();
        let pending_entries = self.stats().pending_entries;

        if drained {
            tracing::info!("Queue drained");
        } else {
            tracing::warn!(
                pending_entries,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Queue shutdown grace period elapsed with work in flight"
            );
        }
        ShutdownReport {
            drained,
            pending_entries,
        }
    }

    /// Returns false if the entry was refused. After shutdown starts, only a
    /// key whose worker is still running accepts work.
    fn push(&self, key: &K, entry: QueueEntry) -> bool {
        let start_worker = {
            let mut states = self.inner.lock();
            if self.is_closed() && !states.get(key).is_some_and(|s| s.active) {
                return false;
            }
            let state = states.entry(key.clone()).or_insert_with(KeyState::new);
            state.pending.push_back(entry);
            state.last_activity = Instant::now();
            if state.active {
                false
            } else {
                state.active = true;
                true
            }
        };

        if start_worker {
            tracing::trace!(?key, "Starting queue worker");
            self.inner
                .tracker
                .spawn(Self::worker(Arc::clone(&self.inner), key.clone()));
        }
        true
    }

    async fn worker(inner: Arc<Inner<K>>, key: K) {
        loop {
            let entry = {
                let mut states = inner.lock();
                let Some(state) = states.get_mut(&key) else {
                    break;
                };
                if let Some(entry) = state.pending.pop_front() {
                    entry
                } else {
                    states.remove(&key);
                    tracing::trace!(?key, "Queue drained, key removed");
                    break;
                }
            };

            let QueueEntry {
                label,
                work,
                cancel,
            } = entry;

            if cancel.is_cancelled() {
                tracing::debug!(?key, %label, "Skipping cancelled entry");
                continue;
            }

            tracing::debug!(?key, %label, "Running queued entry");
            let outcome = tokio::select! {
                result = AssertUnwindSafe(work).catch_unwind() => Some(result),
                () = cancel.cancelled() => None,
            };

            let failure = match outcome {
                None => {
                    tracing::debug!(?key, %label, "Entry cancelled while running");
                    None
                }
                Some(Ok(Ok(()))) => None,
                Some(Ok(Err(e))) => Some(EntryFailure::Error(e)),
                Some(Err(panic)) => Some(EntryFailure::Panicked(panic_message(panic.as_ref()))),
            };

            Self::record(&inner, &key, &label, failure);
        }
    }

    fn record(inner: &Inner<K>, key: &K, label: &str, failure: Option<EntryFailure>) {
        {
            let mut states = inner.lock();
            if let Some(state) = states.get_mut(key) {
                state.last_activity = Instant::now();
                if failure.is_some() {
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                } else {
                    state.consecutive_failures = 0;
                }
            }
        }

        match failure {
            None => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
            }
            Some(failure) => {
                inner.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?key, %label, error = %failure, "Queued entry failed");
                if let Some(hook) = inner.on_failure.get() {
                    hook(key, label, &failure);
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Queue for a single key.
#[derive(Clone)]
pub struct QueueHandle<K> {
    queue: KeyedQueue<K>,
    key: K,
}

impl<K: fmt::Debug> fmt::Debug for QueueHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle").field("key", &self.key).finish()
    }
}

impl<K> QueueHandle<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// The key this handle serializes.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Append work for this key and return immediately.
    ///
    /// Must be called from within a Tokio runtime. Safe to call from inside
    /// an entry running on the same key: the new entry runs after it.
    pub fn enqueue<F>(&self, label: impl Into<String>, work: F) -> EntryTicket
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.enqueue_entry(QueueEntry::new(label, work))
    }

    /// Append a prepared entry.
    ///
    /// Once shutdown has started, work for a key with no running worker is
    /// refused and the returned ticket is cancelled.
    pub fn enqueue_entry(&self, entry: QueueEntry) -> EntryTicket {
        let ticket = entry.ticket();
        if !self.queue.push(&self.key, entry) {
            tracing::warn!(key = ?self.key, label = ticket.label(), "Queue is shutting down, entry refused");
            ticket.cancel();
        }
        ticket
    }
}
