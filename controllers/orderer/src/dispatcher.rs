//! Work dispatch.
//!
//! Watchers say *which* Orderer needs a pass; the dispatcher decides *when*
//! a worker gets it. The reconciler never sees the dispatcher, so the engine
//! can be exercised without any scheduler at all.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cluster_client::ObjectKey;
use tokio::sync::Notify;
use tracing::debug;

/// Hands out reconciliation requests to workers
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Requests a pass for `key`
    fn enqueue(&self, key: ObjectKey);

    /// Waits for the next key to reconcile; `None` once shut down
    async fn next_pass(&self) -> Option<ObjectKey>;

    /// Marks the pass for `key` as finished
    fn done(&self, key: &ObjectKey);
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys waiting for a pass, whether queued or held back while active
    dirty: HashSet<ObjectKey>,
    /// Keys a worker is reconciling right now
    active: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// Deduplicating work queue
///
/// A key is queued at most once, and never handed to two workers at the same
/// time: a key enqueued while its pass is running is held back and queued
/// again when that pass is marked done.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Empty, running queue
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `key` once `delay` has passed
    pub fn enqueue_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    /// Stops handing out work. Waiting and future `next_pass` calls return `None`.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Dispatcher for WorkQueue {
    fn enqueue(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.active.contains(&key) {
            debug!(key = %key, "Pass already running, holding request");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    async fn next_pass(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a shutdown in between is not missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.active.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.active.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }
}
