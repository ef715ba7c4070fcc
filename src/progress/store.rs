use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};

use super::dispatcher::SyncDispatcher;
use crate::{domain::models::ProgressRecord, storage::SnapshotStorage};

/// Storage key of the durable watch history snapshot.
pub const WATCH_HISTORY_KEY: &str = "streaming_watch_history";

/// In-memory watch history mirrored to durable storage.
///
/// The in-memory table is authoritative for the running session: storage
/// failures are logged and never undo an update.
pub struct ProgressStore {
    records: Mutex<Vec<ProgressRecord>>,
    snapshots: Arc<SnapshotWriter>,
    dispatcher: Arc<SyncDispatcher>,
}

impl ProgressStore {
    /// Populate the table from the durable snapshot. A missing or unreadable snapshot yields an
    /// empty store.
    ///
    /// Must be called from within a tokio runtime; snapshot writes run on its blocking pool.
    pub fn load(storage: Arc<dyn SnapshotStorage>, dispatcher: Arc<SyncDispatcher>) -> Self {
        let records = match read_snapshot(storage.as_ref()) {
            Ok(records) => {
                tracing::info!(count = records.len(), "loaded watch history");
                records
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "failed to load watch history");
                Vec::new()
            }
        };
        Self {
            records: Mutex::new(records),
            snapshots: Arc::new(SnapshotWriter {
                storage,
                runtime: Handle::current(),
                submitted: AtomicU64::new(0),
                applied: Mutex::new(0),
                latest: Mutex::new(None),
            }),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    /// Stored progress for `content_id`, or 0 when the item was never watched.
    pub fn get_progress(&self, content_id: &str) -> f64 {
        self.records
            .lock()
            .iter()
            .find(|r| r.content_id == content_id)
            .map(|r| r.progress)
            .filter(|p| !p.is_nan())
            .unwrap_or(0.0)
    }

    #[cfg(test)]
    pub fn get_record(&self, content_id: &str) -> Option<ProgressRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.content_id == content_id)
            .cloned()
    }

    /// Upsert progress, queue a snapshot write and hand the value to the sync dispatcher.
    pub fn update_progress(&self, content_id: &str, progress: f64, immediate: bool) -> ProgressRecord {
        let record = ProgressRecord::new(content_id, progress, Utc::now());
        {
            let mut records = self.records.lock();
            upsert(&mut records, record.clone());
            self.persist(&records);
        }
        self.dispatcher.schedule(content_id, progress, immediate);
        record
    }

    /// Insert a record that came from the server without syncing it back.
    ///
    /// Returns false, leaving the table untouched, when a local record already exists.
    pub fn seed(&self, record: ProgressRecord) -> bool {
        let mut records = self.records.lock();
        if records.iter().any(|r| r.content_id == record.content_id) {
            return false;
        }
        records.push(record);
        self.persist(&records);
        true
    }

    /// Forget every record and delete the durable snapshot key.
    pub fn clear_history(&self) {
        let mut records = self.records.lock();
        records.clear();
        self.snapshots.submit(SnapshotChange::Remove);
    }

    /// Snapshot of the table in insertion order.
    pub fn watch_history(&self) -> Vec<ProgressRecord> {
        self.records.lock().clone()
    }

    /// Started items, most recently watched first.
    pub fn continue_watching(&self) -> Vec<ProgressRecord> {
        let mut started: Vec<ProgressRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.is_started())
            .cloned()
            .collect();
        started.sort_by(|a, b| b.last_watched.cmp(&a.last_watched));
        started
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the durable snapshot reflects every change made so far.
    pub async fn flush_snapshot(&self) {
        let latest = self.snapshots.latest.lock().take();
        if let Some(task) = latest {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "watch history write task failed");
            }
        }
    }

    // Called with the records lock held so snapshot order follows table order.
    fn persist(&self, records: &[ProgressRecord]) {
        match serde_json::to_string(records) {
            Ok(json) => self.snapshots.submit(SnapshotChange::Save(json)),
            Err(e) => tracing::error!(error = %e, "failed to encode watch history"),
        }
    }
}

enum SnapshotChange {
    Save(String),
    Remove,
}

/// Applies snapshot changes on the blocking pool. Changes are numbered when submitted;
/// one that arrives after a newer change was applied is skipped.
struct SnapshotWriter {
    storage: Arc<dyn SnapshotStorage>,
    runtime: Handle,
    submitted: AtomicU64,
    applied: Mutex<u64>,
    latest: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    fn submit(self: &Arc<Self>, change: SnapshotChange) {
        let seq = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        let writer = self.clone();
        let task = self
            .runtime
            .spawn_blocking(move || writer.apply(seq, change));
        *self.latest.lock() = Some(task);
    }

    fn apply(&self, seq: u64, change: SnapshotChange) {
        let mut applied = self.applied.lock();
        if seq <= *applied {
            return;
        }
        *applied = seq;
        match change {
            SnapshotChange::Save(json) => {
                if let Err(e) = self.storage.write(WATCH_HISTORY_KEY, &json) {
                    tracing::error!(error = %format!("{:#}", e), "failed to save watch history");
                }
            }
            SnapshotChange::Remove => {
                if let Err(e) = self.storage.remove(WATCH_HISTORY_KEY) {
                    tracing::error!(error = %format!("{:#}", e), "failed to remove watch history");
                }
            }
        }
    }
}

fn upsert(records: &mut Vec<ProgressRecord>, record: ProgressRecord) {
    match records.iter_mut().find(|r| r.content_id == record.content_id) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

fn read_snapshot(storage: &dyn SnapshotStorage) -> anyhow::Result<Vec<ProgressRecord>> {
    let Some(raw) = storage.read(WATCH_HISTORY_KEY)? else {
        return Ok(Vec::new());
    };
    let parsed: Vec<ProgressRecord> = serde_json::from_str(&raw)?;
    // collapse duplicates a hand-edited snapshot may contain; the last entry wins
    let mut records = Vec::with_capacity(parsed.len());
    for record in parsed {
        if !record.progress.is_finite() || !(0.0..=100.0).contains(&record.progress) {
            tracing::warn!(
                content_id = %record.content_id,
                progress = record.progress,
                "dropping snapshot record with out-of-range progress"
            );
            continue;
        }
        upsert(&mut records, record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        progress::dispatcher::{DEFAULT_DEBOUNCE, testing::RecordingRemote},
        storage::MemoryStorage,
    };

    struct Fixture {
        storage: Arc<MemoryStorage>,
        remote: Arc<RecordingRemote>,
        store: ProgressStore,
    }

    fn fixture_with(storage: Arc<MemoryStorage>) -> Fixture {
        let remote = Arc::new(RecordingRemote::default());
        let dispatcher = Arc::new(SyncDispatcher::new(remote.clone(), DEFAULT_DEBOUNCE));
        let store = ProgressStore::load(storage.clone(), dispatcher);
        Fixture {
            storage,
            remote,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryStorage::new()))
    }

    fn snapshot(storage: &MemoryStorage) -> Option<Vec<ProgressRecord>> {
        storage
            .read(WATCH_HISTORY_KEY)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[tokio::test]
    async fn unknown_content_has_zero_progress() {
        let f = fixture();
        assert_eq!(f.store.get_progress("never-watched"), 0.0);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn read_after_write() {
        let f = fixture();
        for (id, p) in [("a", 0.0), ("b", 33.3), ("c", 100.0)] {
            f.store.update_progress(id, p, false);
            assert_eq!(f.store.get_progress(id), p);
        }
        f.store.update_progress("b", 60.0, false);
        assert_eq!(f.store.get_progress("b"), 60.0);
        assert_eq!(f.store.len(), 3);
    }

    #[tokio::test]
    async fn update_replaces_in_place_and_stamps_time() {
        let f = fixture();
        f.store.update_progress("a", 10.0, false);
        f.store.update_progress("b", 20.0, false);
        let before = f.store.get_record("a").unwrap().last_watched;
        f.store.update_progress("a", 30.0, false);

        let history = f.store.watch_history();
        let ids: Vec<&str> = history.iter().map(|r| r.content_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(history[0].progress, 30.0);
        assert!(history[0].last_watched >= before);
    }

    #[tokio::test]
    async fn update_persists_snapshot() {
        let f = fixture();
        f.store.update_progress("x", 25.5, false);
        f.store.flush_snapshot().await;
        let saved = snapshot(&f.storage).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].content_id, "x");
        assert_eq!(saved[0].progress, 25.5);
    }

    #[tokio::test]
    async fn load_reads_existing_snapshot() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write(
                WATCH_HISTORY_KEY,
                r#"[{"contentId":"a","progress":50,"lastWatched":"2024-01-01T00:00:00.000Z"}]"#,
            )
            .unwrap();
        let f = fixture_with(storage);
        assert_eq!(f.store.get_progress("a"), 50.0);
        assert!(f.remote.writes().is_empty());
    }

    #[tokio::test]
    async fn load_collapses_duplicate_ids() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write(
                WATCH_HISTORY_KEY,
                r#"[{"contentId":"a","progress":10,"lastWatched":"2024-01-01T00:00:00Z"},
                    {"contentId":"a","progress":40,"lastWatched":"2024-01-02T00:00:00Z"}]"#,
            )
            .unwrap();
        let f = fixture_with(storage);
        assert_eq!(f.store.len(), 1);
        assert_eq!(f.store.get_progress("a"), 40.0);
    }

    #[tokio::test]
    async fn load_drops_out_of_range_progress() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write(
                WATCH_HISTORY_KEY,
                r#"[{"contentId":"over","progress":150,"lastWatched":"2024-01-01T00:00:00Z"},
                    {"contentId":"under","progress":-5,"lastWatched":"2024-01-01T00:00:00Z"},
                    {"contentId":"ok","progress":50,"lastWatched":"2024-01-01T00:00:00Z"}]"#,
            )
            .unwrap();
        let f = fixture_with(storage);
        let ids: Vec<String> = f
            .store
            .watch_history()
            .into_iter()
            .map(|r| r.content_id)
            .collect();
        assert_eq!(ids, vec!["ok"]);
        assert_eq!(f.store.get_progress("over"), 0.0);
    }

    /// Memory storage whose writes wait while the test holds `gate`.
    #[derive(Default)]
    struct GatedStorage {
        inner: MemoryStorage,
        gate: Mutex<()>,
    }

    impl SnapshotStorage for GatedStorage {
        fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.read(key)
        }

        fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
            let _open = self.gate.lock();
            self.inner.write(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            let _open = self.gate.lock();
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn slow_storage_does_not_hold_up_updates() {
        let storage = Arc::new(GatedStorage::default());
        let remote = Arc::new(RecordingRemote::default());
        let dispatcher = Arc::new(SyncDispatcher::new(remote, DEFAULT_DEBOUNCE));
        let store = ProgressStore::load(storage.clone(), dispatcher);

        let closed = storage.gate.lock();
        store.update_progress("a", 10.0, false);
        store.update_progress("a", 20.0, false);
        store.update_progress("b", 5.0, false);
        assert_eq!(store.get_progress("a"), 20.0);
        assert_eq!(storage.inner.read(WATCH_HISTORY_KEY).unwrap(), None);
        drop(closed);

        store.flush_snapshot().await;
        let saved = snapshot(&storage.inner).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].progress, 20.0);
    }

    #[tokio::test]
    async fn clear_after_updates_leaves_no_snapshot() {
        let f = fixture();
        for p in [10.0, 20.0, 30.0] {
            f.store.update_progress("a", p, false);
        }
        f.store.clear_history();
        f.store.flush_snapshot().await;
        assert_eq!(f.storage.read(WATCH_HISTORY_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write(WATCH_HISTORY_KEY, "{not json").unwrap();
        let f = fixture_with(storage);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn unreadable_storage_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_failing(true);
        let f = fixture_with(storage);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_keeps_in_memory_update() {
        let f = fixture();
        f.storage.set_failing(true);
        f.store.update_progress("a", 42.0, false);
        assert_eq!(f.store.get_progress("a"), 42.0);
        f.store.flush_snapshot().await;

        f.storage.set_failing(false);
        assert_eq!(snapshot(&f.storage), None);
    }

    #[tokio::test]
    async fn clear_history_removes_key() {
        let f = fixture();
        f.store.update_progress("a", 10.0, false);
        f.store.update_progress("b", 20.0, false);
        f.store.clear_history();
        f.store.flush_snapshot().await;

        assert_eq!(f.store.get_progress("a"), 0.0);
        assert_eq!(f.store.get_progress("b"), 0.0);
        assert!(f.store.watch_history().is_empty());
        assert_eq!(f.storage.read(WATCH_HISTORY_KEY).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_debounced_to_remote() {
        let f = fixture();
        f.store.update_progress("id", 30.0, false);
        f.store.update_progress("id", 55.0, false);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.remote.writes(), vec![("id".to_string(), 55.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_update_skips_debounce() {
        let f = fixture();
        f.store.update_progress("id", 40.0, false);
        f.store.update_progress("id", 90.0, true);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(f.remote.writes(), vec![("id".to_string(), 90.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_rejection_leaves_local_state_alone() {
        let f = fixture();
        *f.remote.fail_writes.lock() = true;
        let record = f.store.update_progress("id", 64.0, true);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(f.remote.writes().len(), 1);
        assert_eq!(f.store.get_record("id"), Some(record));
    }

    #[tokio::test]
    async fn seed_only_fills_missing_ids() {
        let f = fixture();
        f.store.update_progress("local", 20.0, false);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(!f.store.seed(ProgressRecord::new("local", 80.0, t)));
        assert_eq!(f.store.get_progress("local"), 20.0);

        assert!(f.store.seed(ProgressRecord::new("remote", 75.0, t)));
        assert_eq!(f.store.get_record("remote").unwrap().last_watched, t);
        f.store.flush_snapshot().await;
        assert_eq!(snapshot(&f.storage).unwrap().len(), 2);
        assert!(!f.store.dispatcher().is_pending("remote"));
    }

    #[tokio::test]
    async fn continue_watching_orders_by_recency() {
        let f = fixture();
        let t = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        f.store.seed(ProgressRecord::new("old", 10.0, t(1)));
        f.store.seed(ProgressRecord::new("newer", 50.0, t(5)));
        f.store.seed(ProgressRecord::new("unstarted", 0.0, t(9)));
        f.store.update_progress("now", 5.0, false);

        let ids: Vec<String> = f
            .store
            .continue_watching()
            .into_iter()
            .map(|r| r.content_id)
            .collect();
        assert_eq!(ids, vec!["now", "newer", "old"]);
    }
}
