//! Shared delayed-task facility.
//!
//! Retransmission timers, sweep tasks and the NON pacing loop all run here.
//! Each task is registered under a [`TaskKey`]; scheduling under a key that
//! is already taken aborts the older task, so there is never more than one
//! timer per exchange or one pacing loop per peer, and cancellation is a
//! single lookup.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::exchange::ExchangeId;

/// Identity of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Retransmission timer of an exchange.
    Retransmission(ExchangeId),
    /// Bookkeeping sweep of an exchange.
    Sweep(ExchangeId),
    /// Non-confirmable pacing loop of a peer.
    Pacing(SocketAddr),
}

#[derive(Debug)]
struct Registration {
    generation: u64,
    handle: AbortHandle,
}

/// Keyed, cancellable timer service on a tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
    tasks: Arc<DashMap<TaskKey, Registration>>,
    next_generation: Arc<AtomicU64>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.tasks.len())
            .finish()
    }
}

impl Scheduler {
    /// Run tasks on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `task` once after `delay`, replacing any task under `key`.
    pub fn schedule<F>(&self, key: TaskKey, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);

        // The entry stays locked until the task is registered, so a task with
        // a zero delay cannot deregister before it was registered.
        let entry = self.tasks.entry(key);
        let handle = self
            .runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;
                tasks.remove_if(&key, |_, registration| registration.generation == generation);
                task();
            })
            .abort_handle();

        let registration = Registration { generation, handle };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(registration);
                previous.handle.abort();
                tracing::trace!(?key, delay_ms = delay.as_millis() as u64, "task rescheduled");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(registration);
                tracing::trace!(?key, delay_ms = delay.as_millis() as u64, "task scheduled");
            }
        }
    }

    /// Abort the task under `key`. Returns whether one was pending.
    ///
    /// A task that already woke up and is running is not interrupted; the
    /// callers check their own state for staleness.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tasks.remove(key) {
            Some((_, registration)) => {
                registration.handle.abort();
                tracing::trace!(?key, "task cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a task is waiting under `key`.
    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}
