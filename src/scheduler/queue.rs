use crate::types::ObjectKey;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Deduplicating work queue keyed by parent.
///
/// A key is handed to at most one worker at a time. Adding a key that is
/// already waiting is a no-op; adding a key that is being processed marks it
/// dirty and it is queued again once the worker calls [`WorkQueue::done`].
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

impl WorkQueue {
    /// Failed keys are retried after `base * 2^(failures - 1)`, capped at `max`.
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                backoff_base,
                backoff_max,
            }),
        }
    }

    pub fn add(&self, key: ObjectKey) {
        let mut state = self.shared.state.lock();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            trace!(%key, "key in flight, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Adds `key` once `delay` has passed. Must be called within a Tokio
    /// runtime.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Records a failure for `key` and schedules it after its backoff delay.
    pub fn add_rate_limited(&self, key: ObjectKey) -> Duration {
        let delay = self.next_backoff(&key);
        trace!(%key, ?delay, "backing off");
        self.add_after(key, delay);
        delay
    }

    /// Upper bound of the per-key backoff delay.
    pub fn backoff_max(&self) -> Duration {
        self.shared.backoff_max
    }

    fn next_backoff(&self, key: &ObjectKey) -> Duration {
        let mut state = self.shared.state.lock();
        let failures = state.failures.entry(key.clone()).or_default();
        let exp = *failures;
        *failures = failures.saturating_add(1);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.shared
            .backoff_base
            .checked_mul(factor)
            .map_or(self.shared.backoff_max, |d| d.min(self.shared.backoff_max))
    }

    /// Clears the failure count of `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.shared.state.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.shared
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Waits for the next key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Marks `key` as no longer in flight.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.shared.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Wakes every waiting worker and stops handing out keys.
    pub fn shutdown(&self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
