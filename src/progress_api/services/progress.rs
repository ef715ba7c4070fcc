use poem_openapi::payload::Json;

use crate::{
    progress::ProgressStore,
    progress_api::models::{
        ErrorDto, HistoryResponse, NoContentResponse, ProgressDto, ProgressGetResponse,
        ProgressPutResponse, ProgressRecordDto, ProgressUpdateDto,
    },
};

pub struct ProgressService<'a> {
    pub store: &'a ProgressStore,
}

impl<'a> ProgressService<'a> {
    pub fn new(store: &'a ProgressStore) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn get_progress(&self, content_id: &str) -> ProgressGetResponse {
        ProgressGetResponse::Ok(Json(ProgressDto {
            content_id: content_id.to_string(),
            progress: self.store.get_progress(content_id),
        }))
    }

    #[tracing::instrument(level = "debug", skip(self, body))]
    pub fn update_progress(&self, content_id: &str, body: ProgressUpdateDto) -> ProgressPutResponse {
        if content_id.trim().is_empty() {
            return ProgressPutResponse::BadRequest(Json(ErrorDto {
                message: "content id is required".into(),
            }));
        }
        if !body.progress.is_finite() || !(0.0..=100.0).contains(&body.progress) {
            tracing::debug!(content_id, progress = body.progress, "rejecting out-of-range progress");
            return ProgressPutResponse::BadRequest(Json(ErrorDto {
                message: format!("progress must be between 0 and 100, got {}", body.progress),
            }));
        }
        let record = self
            .store
            .update_progress(content_id, body.progress, body.immediate);
        ProgressPutResponse::Ok(Json(record.into()))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn history(&self) -> HistoryResponse {
        HistoryResponse::Ok(Json(
            self.store
                .watch_history()
                .into_iter()
                .map(ProgressRecordDto::from)
                .collect(),
        ))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn continue_watching(&self) -> HistoryResponse {
        HistoryResponse::Ok(Json(
            self.store
                .continue_watching()
                .into_iter()
                .map(ProgressRecordDto::from)
                .collect(),
        ))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn clear_history(&self) -> NoContentResponse {
        self.store.clear_history();
        tracing::info!("watch history cleared");
        NoContentResponse::NoContent
    }
}
