use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

use super::store::ProgressStore;

/// Minimum spacing between progress reports while a video plays.
pub const TICK_THROTTLE: Duration = Duration::from_millis(250);

/// A session that has seen no player event for this long is considered abandoned.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Percent watched for a playback position, clamped to [0, 100].
///
/// `None` while the duration is unknown (zero or negative) or either value is not finite.
pub fn progress_percent(position_secs: f64, duration_secs: f64) -> Option<f64> {
    if !position_secs.is_finite() || !duration_secs.is_finite() || duration_secs <= 0.0 {
        return None;
    }
    Some((position_secs / duration_secs * 100.0).clamp(0.0, 100.0))
}

/// Feeds player events for one content item into the progress store.
pub struct PlaybackSession {
    store: Arc<ProgressStore>,
    content_id: String,
    last_report: Option<Instant>,
    last_seen: Instant,
}

impl PlaybackSession {
    pub fn new(store: Arc<ProgressStore>, content_id: impl Into<String>) -> Self {
        Self {
            store,
            content_id: content_id.into(),
            last_report: None,
            last_seen: Instant::now(),
        }
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Time since the last player event, as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Where to seek once the duration is known; 0 starts from the beginning.
    pub fn resume_position(&self, duration_secs: f64) -> f64 {
        let progress = self.store.get_progress(&self.content_id);
        if progress <= 0.0 || !duration_secs.is_finite() || duration_secs <= 0.0 {
            return 0.0;
        }
        progress / 100.0 * duration_secs
    }

    /// Handle a time update from the player. Returns true when progress was recorded.
    pub fn on_time_update(
        &mut self,
        position_secs: f64,
        duration_secs: f64,
        playing: bool,
        seeking: bool,
    ) -> bool {
        let now = Instant::now();
        self.last_seen = now;
        if !playing || seeking {
            return false;
        }
        let Some(percent) = progress_percent(position_secs, duration_secs) else {
            return false;
        };
        if let Some(last) = self.last_report {
            if now.duration_since(last) < TICK_THROTTLE {
                return false;
            }
        }
        self.last_report = Some(now);
        self.store.update_progress(&self.content_id, percent, false);
        true
    }

    /// The player is closing: record the final position and sync it without waiting.
    pub fn close(self, position_secs: f64, duration_secs: f64) {
        match progress_percent(position_secs, duration_secs) {
            Some(percent) => {
                self.store.update_progress(&self.content_id, percent, true);
            }
            None => {
                tracing::debug!(content_id = %self.content_id, "closing before duration was known");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        progress::{
            SyncDispatcher,
            dispatcher::{DEFAULT_DEBOUNCE, testing::RecordingRemote},
        },
        storage::MemoryStorage,
    };

    fn store(remote: &Arc<RecordingRemote>) -> Arc<ProgressStore> {
        let dispatcher = Arc::new(SyncDispatcher::new(remote.clone(), DEFAULT_DEBOUNCE));
        Arc::new(ProgressStore::load(Arc::new(MemoryStorage::new()), dispatcher))
    }

    #[test]
    fn percent_math() {
        assert_eq!(progress_percent(30.0, 120.0), Some(25.0));
        assert_eq!(progress_percent(130.0, 120.0), Some(100.0));
        assert_eq!(progress_percent(-1.0, 120.0), Some(0.0));
        assert_eq!(progress_percent(10.0, 0.0), None);
        assert_eq!(progress_percent(f64::NAN, 10.0), None);
        assert_eq!(progress_percent(1.0, f64::INFINITY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_throttled() {
        let remote = Arc::new(RecordingRemote::default());
        let store = store(&remote);
        let mut session = PlaybackSession::new(store.clone(), "movie");

        assert!(session.on_time_update(10.0, 100.0, true, false));
        assert!(!session.on_time_update(10.1, 100.0, true, false));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(session.on_time_update(10.3, 100.0, true, false));
        assert!((store.get_progress("movie") - 10.3).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_counts_from_last_event() {
        let remote = Arc::new(RecordingRemote::default());
        let mut session = PlaybackSession::new(store(&remote), "movie");

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(session.idle_for(Instant::now()), Duration::from_secs(30));

        // paused ticks still count as activity
        session.on_time_update(10.0, 100.0, false, false);
        assert_eq!(session.idle_for(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_or_seeking_ticks_are_ignored() {
        let remote = Arc::new(RecordingRemote::default());
        let store = store(&remote);
        let mut session = PlaybackSession::new(store.clone(), "movie");

        assert!(!session.on_time_update(10.0, 100.0, false, false));
        assert!(!session.on_time_update(10.0, 100.0, true, true));
        assert!(!session.on_time_update(10.0, 0.0, true, false));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_syncs_immediately() {
        let remote = Arc::new(RecordingRemote::default());
        let store = store(&remote);
        let mut session = PlaybackSession::new(store.clone(), "movie");
        session.on_time_update(20.0, 200.0, true, false);
        session.close(180.0, 200.0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(remote.writes(), vec![("movie".to_string(), 90.0)]);
        assert_eq!(store.get_progress("movie"), 90.0);
    }

    #[tokio::test]
    async fn resume_position_uses_stored_progress() {
        let remote = Arc::new(RecordingRemote::default());
        let store = store(&remote);
        let session = PlaybackSession::new(store.clone(), "movie");
        assert_eq!(session.resume_position(600.0), 0.0);

        store.update_progress("movie", 25.0, false);
        assert_eq!(session.resume_position(600.0), 150.0);
        assert_eq!(session.resume_position(0.0), 0.0);
        assert_eq!(session.content_id(), "movie");
    }
}
