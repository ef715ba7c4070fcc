use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};

use crate::streaming_client::RemoteProgressStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

struct PendingSync {
    generation: u64,
    progress: f64,
    task: JoinHandle<()>,
}

/// Remote writes for one content id. Present while a write is in flight.
#[derive(Default)]
struct WriteLane {
    /// Written once the in-flight write finishes; a newer value replaces it.
    next: Option<f64>,
    idle: Vec<oneshot::Sender<()>>,
}

struct Shared {
    remote: Arc<dyn RemoteProgressStore>,
    runtime: Handle,
    pending: Mutex<HashMap<String, PendingSync>>,
    lanes: Mutex<HashMap<String, WriteLane>>,
    alive: AtomicBool,
}

/// Debounced, per-content push of progress to the remote store.
///
/// Each content id has at most one pending timer. Scheduling again cancels the
/// old timer, so only the newest value is ever written. Writes for one id run
/// one at a time in the order they were handed over. Writes are fire and
/// forget: failures are logged and never reach the caller.
pub struct SyncDispatcher {
    shared: Arc<Shared>,
    debounce: Duration,
    generation: AtomicU64,
}

impl SyncDispatcher {
    /// Must be called from within a tokio runtime; timers and writes are spawned onto it.
    pub fn new(remote: Arc<dyn RemoteProgressStore>, debounce: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                runtime: Handle::current(),
                pending: Mutex::new(HashMap::new()),
                lanes: Mutex::new(HashMap::new()),
                alive: AtomicBool::new(true),
            }),
            debounce,
            generation: AtomicU64::new(0),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    #[cfg(test)]
    pub fn is_pending(&self, content_id: &str) -> bool {
        self.shared.pending.lock().contains_key(content_id)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub fn schedule(&self, content_id: &str, progress: f64, immediate: bool) {
        if !self.shared.alive.load(Ordering::Acquire) {
            tracing::debug!(content_id, "dispatcher shut down; dropping progress sync");
            return;
        }

        // Held until the value is either queued as a write or parked behind a timer, so
        // hand-over order matches scheduling order.
        let mut pending = self.shared.pending.lock();
        if let Some(old) = pending.remove(content_id) {
            old.task.abort();
        }

        if immediate {
            self.shared.enqueue_write(content_id, progress);
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let shared = self.shared.clone();
        let debounce = self.debounce;
        let id = content_id.to_string();
        // The lock is still held, so the timer cannot look itself up before it is inserted.
        let task = self.shared.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if !shared.alive.load(Ordering::Acquire) {
                return;
            }
            let mut pending = shared.pending.lock();
            match pending.get(&id) {
                Some(entry) if entry.generation == generation => {
                    pending.remove(&id);
                }
                _ => return,
            }
            shared.enqueue_write(&id, progress);
        });
        pending.insert(
            content_id.to_string(),
            PendingSync {
                generation,
                progress,
                task,
            },
        );
    }

    /// Cancel every pending timer, write its value right away and wait until no write is
    /// in flight.
    pub async fn flush_pending(&self) {
        let waiters: Vec<oneshot::Receiver<()>> = {
            let mut pending = self.shared.pending.lock();
            if !pending.is_empty() {
                tracing::info!(count = pending.len(), "flushing pending progress syncs");
            }
            for (id, entry) in pending.drain() {
                entry.task.abort();
                self.shared.enqueue_write(&id, entry.progress);
            }
            self.shared
                .lanes
                .lock()
                .values_mut()
                .map(|lane| {
                    let (tx, rx) = oneshot::channel();
                    lane.idle.push(tx);
                    rx
                })
                .collect()
        };
        for waiter in waiters {
            let _ = waiter.await;
        }
    }

    /// Teardown: cancel all pending timers. Later `schedule` calls are ignored.
    pub fn shutdown(&self) {
        self.shared.alive.store(false, Ordering::Release);
        let mut pending = self.shared.pending.lock();
        let cancelled = pending.len();
        for (_, entry) in pending.drain() {
            entry.task.abort();
        }
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled pending progress syncs");
        }
    }
}

impl Drop for SyncDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn enqueue_write(self: &Arc<Self>, content_id: &str, progress: f64) {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get_mut(content_id) {
            lane.next = Some(progress);
            return;
        }
        lanes.insert(content_id.to_string(), WriteLane::default());
        let shared = self.clone();
        let id = content_id.to_string();
        self.runtime.spawn(async move {
            shared.drain_lane(id, progress).await;
        });
    }

    async fn drain_lane(&self, content_id: String, mut progress: f64) {
        loop {
            push(self.remote.as_ref(), &content_id, progress).await;
            let next = {
                let mut lanes = self.lanes.lock();
                let queued = lanes
                    .get_mut(&content_id)
                    .and_then(|lane| lane.next.take())
                    .filter(|_| self.alive.load(Ordering::Acquire));
                if queued.is_none() {
                    if let Some(lane) = lanes.remove(&content_id) {
                        for waiter in lane.idle {
                            let _ = waiter.send(());
                        }
                    }
                }
                queued
            };
            match next {
                Some(newer) => progress = newer,
                None => return,
            }
        }
    }
}

async fn push(remote: &dyn RemoteProgressStore, content_id: &str, progress: f64) {
    match remote.update_progress(content_id, progress).await {
        Ok(()) => tracing::debug!(content_id, progress, "synced watch progress"),
        Err(e) => tracing::warn!(
            content_id,
            progress,
            error = %format!("{:#}", e),
            "failed to sync watch progress"
        ),
    }
}
