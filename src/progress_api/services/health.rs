use poem_openapi::payload::PlainText;

use super::playback::PlaybackSessions;
use crate::progress::ProgressStore;

pub struct HealthService<'a> {
    pub store: &'a ProgressStore,
    pub sessions: &'a PlaybackSessions,
}

impl<'a> HealthService<'a> {
    pub fn new(store: &'a ProgressStore, sessions: &'a PlaybackSessions) -> Self {
        Self { store, sessions }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn status_text(&self) -> PlainText<String> {
        PlainText(format!(
            "records={} pending_syncs={} playback_sessions={}",
            self.store.len(),
            self.store.dispatcher().pending_count(),
            self.sessions.lock().len()
        ))
    }
}
