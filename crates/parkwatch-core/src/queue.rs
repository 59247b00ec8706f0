//! Offline-resilient action queue.
//!
//! Actions enqueued while the backend is unreachable are held in FIFO
//! order and drained automatically once reachability flips back to
//! [`Reachability::Online`]. Each action carries a retry budget; a
//! retryable failure demotes the action to the tail of the queue so one
//! persistently failing action cannot starve the rest, and a permanent
//! failure discards it immediately.
//!
//! Drains are single-flight: no matter how many enqueues or
//! online-transitions race, at most one drain task runs at a time. The
//! pending list is guarded by a plain `std::sync::Mutex` that is never
//! held across an await point.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_core::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parkwatch_api::probe::Reachability;

use crate::error::ActionError;

/// Default per-action retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ── Identifiers & options ────────────────────────────────────────────

/// Opaque handle to a queued action, usable with
/// [`ActionRetryQueue::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-action enqueue settings.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Total execution budget. An action that keeps failing with
    /// [`ActionError::Retryable`] runs at most this many times before
    /// being dropped. Default: [`DEFAULT_MAX_RETRIES`].
    pub max_retries: u32,

    /// Human-readable label carried through logs and
    /// [`ActionRetryQueue::snapshot`].
    pub description: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            description: None,
        }
    }
}

impl EnqueueOptions {
    pub fn described(label: impl Into<String>) -> Self {
        Self {
            description: Some(label.into()),
            ..Self::default()
        }
    }
}

/// Point-in-time view of one pending action.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PendingAction {
    pub id: ActionId,
    pub description: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

// ── Internals ────────────────────────────────────────────────────────

type ActionFuture = BoxFuture<'static, Result<(), ActionError>>;

/// Factory rather than a future: each retry needs a fresh execution.
type ActionFactory = Box<dyn FnMut() -> ActionFuture + Send>;

struct QueuedAction {
    id: ActionId,
    description: Option<String>,
    retry_count: u32,
    max_retries: u32,
    enqueued_at: DateTime<Utc>,
    run: ActionFactory,
}

impl QueuedAction {
    fn info(&self) -> PendingAction {
        PendingAction {
            id: self.id,
            description: self.description.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            enqueued_at: self.enqueued_at,
        }
    }
}

struct Inner {
    pending: Mutex<VecDeque<QueuedAction>>,
    /// Single-flight guard: set while a drain task is running.
    draining: AtomicBool,
    reachability: watch::Receiver<Reachability>,
    cancel: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedAction>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn online(&self) -> bool {
        *self.reachability.borrow() == Reachability::Online
    }
}

// ── ActionRetryQueue ─────────────────────────────────────────────────

/// FIFO queue of fallible actions, drained while the backend is
/// reachable.
///
/// Constructed explicitly against a reachability feed (see
/// [`parkwatch_api::ReachabilityMonitor::subscribe`]) and torn down
/// explicitly with [`ActionRetryQueue::shutdown`].
pub struct ActionRetryQueue {
    inner: Arc<Inner>,
}

impl ActionRetryQueue {
    /// Create the queue and start watching `reachability` for
    /// Offline → Online transitions, each of which triggers a drain.
    pub fn new(reachability: watch::Receiver<Reachability>) -> Self {
        let inner = Arc::new(Inner {
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            reachability: reachability.clone(),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(online_watcher(Arc::clone(&inner), reachability));

        Self { inner }
    }

    /// Append an action to the tail of the queue.
    ///
    /// `factory` is invoked once per execution attempt, so captured
    /// state must survive being called multiple times. If the backend
    /// is currently believed reachable, a drain starts immediately.
    pub fn enqueue<F, Fut>(&self, mut factory: F, options: EnqueueOptions) -> ActionId
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        let id = ActionId::new();
        let action = QueuedAction {
            id,
            description: options.description,
            retry_count: 0,
            max_retries: options.max_retries,
            enqueued_at: Utc::now(),
            run: Box::new(move || Box::pin(factory())),
        };

        let depth = {
            let mut pending = self.inner.lock();
            pending.push_back(action);
            pending.len()
        };
        tracing::debug!(%id, depth, "action enqueued");

        if self.inner.online() {
            schedule_drain(&self.inner);
        }
        id
    }

    /// Remove a pending action by id. Returns `false` if it already
    /// completed, was dropped, or is executing right now.
    pub fn remove(&self, id: ActionId) -> bool {
        let mut pending = self.inner.lock();
        let before = pending.len();
        pending.retain(|action| action.id != id);
        pending.len() < before
    }

    /// Discard every pending action.
    pub fn clear(&self) {
        let dropped = {
            let mut pending = self.inner.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            tracing::debug!(dropped, "queue cleared");
        }
    }

    /// Snapshot of the pending actions, head first.
    pub fn snapshot(&self) -> Vec<PendingAction> {
        self.inner.lock().iter().map(QueuedAction::info).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Stop the reachability watcher and any in-progress drain after
    /// its current action. Pending actions are dropped with the queue.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

// ── Draining ─────────────────────────────────────────────────────────

/// Start a drain task unless one is already running.
fn schedule_drain(inner: &Arc<Inner>) {
    if inner.draining.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(drain(Arc::clone(inner)));
}

/// Run queued actions head-first until the queue is empty, the backend
/// goes offline, or the queue shuts down.
async fn drain(inner: Arc<Inner>) {
    loop {
        while !inner.cancel.is_cancelled() {
            if !inner.online() {
                tracing::debug!("backend offline, pausing drain");
                break;
            }
            let Some(mut action) = inner.lock().pop_front() else {
                break;
            };

            let id = action.id;
            match (action.run)().await {
                Ok(()) => {
                    tracing::debug!(%id, description = action.description.as_deref(), "action succeeded");
                }
                Err(ActionError::Permanent(reason)) => {
                    tracing::warn!(%id, description = action.description.as_deref(), reason, "action failed permanently, dropping");
                }
                Err(ActionError::Retryable(reason)) => {
                    action.retry_count += 1;
                    if action.retry_count >= action.max_retries {
                        tracing::warn!(
                            %id,
                            description = action.description.as_deref(),
                            attempts = action.retry_count,
                            reason,
                            "retry budget exhausted, dropping action"
                        );
                    } else {
                        tracing::debug!(
                            %id,
                            attempt = action.retry_count,
                            max_retries = action.max_retries,
                            reason,
                            "action failed, demoting to tail"
                        );
                        inner.lock().push_back(action);
                    }
                }
            }
        }

        inner.draining.store(false, Ordering::SeqCst);

        // An enqueue may have raced the flag clear; re-arm and keep
        // going only if there is still work we are allowed to run.
        if inner.cancel.is_cancelled() || !inner.online() || inner.lock().is_empty() {
            return;
        }
        if inner.draining.swap(true, Ordering::SeqCst) {
            return;
        }
    }
}

/// Watches the reachability feed and drains on each flip to Online.
async fn online_watcher(inner: Arc<Inner>, mut reachability: watch::Receiver<Reachability>) {
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            changed = reachability.changed() => {
                if changed.is_err() {
                    break;
                }
                if *reachability.borrow_and_update() == Reachability::Online {
                    tracing::debug!(pending = inner.lock().len(), "backend reachable again, draining");
                    schedule_drain(&inner);
                }
            }
        }
    }
    tracing::debug!("queue watcher stopped");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enqueue_options() {
        let options = EnqueueOptions::default();
        assert_eq!(options.max_retries, DEFAULT_MAX_RETRIES);
        assert!(options.description.is_none());
    }

    #[test]
    fn described_sets_label() {
        let options = EnqueueOptions::described("report sighting");
        assert_eq!(options.description.as_deref(), Some("report sighting"));
        assert_eq!(options.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn offline_queue_holds_actions_in_fifo_order() {
        let (_tx, rx) = watch::channel(Reachability::Offline);
        let queue = ActionRetryQueue::new(rx);

        let a = queue.enqueue(|| async { Ok(()) }, EnqueueOptions::described("a"));
        let b = queue.enqueue(|| async { Ok(()) }, EnqueueOptions::described("b"));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, a);
        assert_eq!(snapshot[1].id, b);

        queue.shutdown();
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let (_tx, rx) = watch::channel(Reachability::Offline);
        let queue = ActionRetryQueue::new(rx);

        let a = queue.enqueue(|| async { Ok(()) }, EnqueueOptions::default());
        let _b = queue.enqueue(|| async { Ok(()) }, EnqueueOptions::default());

        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());

        queue.shutdown();
    }
}
