use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use poem_openapi::payload::Json;
use tokio::time::Instant;

use crate::{
    progress::{
        ProgressStore,
        playback::{PlaybackSession, SESSION_IDLE_TIMEOUT},
    },
    progress_api::models::{
        NoContentResponse, PlaybackCloseDto, PlaybackTickDto, ResumeDto, ResumeResponse,
        TickResponse, TickResultDto,
    },
};

/// Open playback sessions, one per content id. Sessions idle for longer than
/// `SESSION_IDLE_TIMEOUT` are dropped on the next tick.
pub type PlaybackSessions = Mutex<HashMap<String, PlaybackSession>>;

pub struct PlaybackService<'a> {
    pub store: &'a Arc<ProgressStore>,
    pub sessions: &'a PlaybackSessions,
}

impl<'a> PlaybackService<'a> {
    pub fn new(store: &'a Arc<ProgressStore>, sessions: &'a PlaybackSessions) -> Self {
        Self { store, sessions }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn resume(&self, content_id: &str, duration_secs: f64) -> ResumeResponse {
        let session = PlaybackSession::new(self.store.clone(), content_id);
        ResumeResponse::Ok(Json(ResumeDto {
            content_id: content_id.to_string(),
            position_secs: session.resume_position(duration_secs),
        }))
    }

    #[tracing::instrument(level = "trace", skip(self, tick))]
    pub fn tick(&self, content_id: &str, tick: PlaybackTickDto) -> TickResponse {
        let mut sessions = self.sessions.lock();
        evict_idle(&mut sessions, Instant::now());
        let session = sessions
            .entry(content_id.to_string())
            .or_insert_with(|| PlaybackSession::new(self.store.clone(), content_id));
        let recorded = session.on_time_update(
            tick.position_secs,
            tick.duration_secs,
            tick.playing,
            tick.seeking,
        );
        TickResponse::Ok(Json(TickResultDto { recorded }))
    }

    #[tracing::instrument(level = "debug", skip(self, body))]
    pub fn close(&self, content_id: &str, body: PlaybackCloseDto) -> NoContentResponse {
        let session = self
            .sessions
            .lock()
            .remove(content_id)
            .unwrap_or_else(|| PlaybackSession::new(self.store.clone(), content_id));
        session.close(body.position_secs, body.duration_secs);
        NoContentResponse::NoContent
    }

    /// Forget every open session; the player starts fresh on its next tick.
    pub fn end_all(&self) {
        let mut sessions = self.sessions.lock();
        if !sessions.is_empty() {
            tracing::debug!(count = sessions.len(), "ending open playback sessions");
        }
        sessions.clear();
    }
}

fn evict_idle(sessions: &mut HashMap<String, PlaybackSession>, now: Instant) {
    sessions.retain(|_, session| {
        let idle = session.idle_for(now) >= SESSION_IDLE_TIMEOUT;
        if idle {
            tracing::debug!(content_id = session.content_id(), "dropping idle playback session");
        }
        !idle
    });
}
