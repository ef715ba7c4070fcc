use std::sync::Arc;

use poem_openapi::{
    OpenApi,
    param::{Path, Query},
    payload::{Json, PlainText},
};

use super::models::{
    HistoryResponse, NoContentResponse, PlaybackCloseDto, PlaybackTickDto, ProgressGetResponse,
    ProgressPutResponse, ProgressUpdateDto, ResumeResponse, TickResponse,
};
use super::services::{
    health::HealthService,
    playback::{PlaybackService, PlaybackSessions},
    progress::ProgressService,
};
use crate::progress::ProgressStore;

pub struct ProgressApi {
    pub store: Arc<ProgressStore>,
    pub sessions: PlaybackSessions,
}

impl ProgressApi {
    pub fn new(store: Arc<ProgressStore>) -> Self {
        Self {
            store,
            sessions: PlaybackSessions::default(),
        }
    }
}

#[OpenApi]
impl ProgressApi {
    /// Record counts and pending syncs
    #[oai(path = "/status", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn status(&self) -> PlainText<String> {
        HealthService::new(&self.store, &self.sessions).status_text()
    }

    /// Stored progress for one content item
    #[oai(path = "/progress/:content_id", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, content_id))]
    async fn get_progress(&self, content_id: Path<String>) -> ProgressGetResponse {
        ProgressService::new(&self.store).get_progress(&content_id.0)
    }

    /// Record progress from the player and schedule a sync
    #[oai(path = "/progress/:content_id", method = "put")]
    #[tracing::instrument(level = "debug", skip(self, content_id, body))]
    async fn put_progress(
        &self,
        content_id: Path<String>,
        body: Json<ProgressUpdateDto>,
    ) -> ProgressPutResponse {
        ProgressService::new(&self.store).update_progress(&content_id.0, body.0)
    }

    /// Full watch history in insertion order
    #[oai(path = "/history", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn history(&self) -> HistoryResponse {
        ProgressService::new(&self.store).history()
    }

    /// Started items, most recently watched first
    #[oai(path = "/history/continue", method = "get")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn continue_watching(&self) -> HistoryResponse {
        ProgressService::new(&self.store).continue_watching()
    }

    /// Clear the whole watch history and end open playback sessions
    #[oai(path = "/history", method = "delete")]
    #[tracing::instrument(level = "debug", skip(self))]
    async fn clear_history(&self) -> NoContentResponse {
        PlaybackService::new(&self.store, &self.sessions).end_all();
        ProgressService::new(&self.store).clear_history()
    }

    // ===== Raw player positions =====

    /// Seek position for resuming playback
    #[oai(path = "/playback/:content_id/resume", method = "get")]
    #[tracing::instrument(level = "debug", skip(self, content_id, duration_secs))]
    async fn playback_resume(
        &self,
        content_id: Path<String>,
        /// Media duration in seconds
        Query(duration_secs): Query<f64>,
    ) -> ResumeResponse {
        PlaybackService::new(&self.store, &self.sessions).resume(&content_id.0, duration_secs)
    }

    /// Player time update; recorded at most every 250 ms per item
    #[oai(path = "/playback/:content_id/tick", method = "post")]
    #[tracing::instrument(level = "trace", skip(self, content_id, body))]
    async fn playback_tick(
        &self,
        content_id: Path<String>,
        body: Json<PlaybackTickDto>,
    ) -> TickResponse {
        PlaybackService::new(&self.store, &self.sessions).tick(&content_id.0, body.0)
    }

    /// Player closed; the final position is synced right away
    #[oai(path = "/playback/:content_id/close", method = "post")]
    #[tracing::instrument(level = "debug", skip(self, content_id, body))]
    async fn playback_close(
        &self,
        content_id: Path<String>,
        body: Json<PlaybackCloseDto>,
    ) -> NoContentResponse {
        PlaybackService::new(&self.store, &self.sessions).close(&content_id.0, body.0)
    }
}
