use chrono::{DateTime, Utc};
use poem_openapi::{ApiResponse, Object, payload::Json};

use crate::domain::models::ProgressRecord;

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ProgressDto {
    pub content_id: String,
    /// Percent watched, 0 when the item was never played
    pub progress: f64,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ProgressRecordDto {
    pub content_id: String,
    pub progress: f64,
    pub last_watched: DateTime<Utc>,
}

impl From<ProgressRecord> for ProgressRecordDto {
    fn from(r: ProgressRecord) -> Self {
        ProgressRecordDto {
            content_id: r.content_id,
            progress: r.progress,
            last_watched: r.last_watched,
        }
    }
}

#[derive(Debug, Clone, Object)]
pub struct ProgressUpdateDto {
    /// Percent watched, 0 - 100
    pub progress: f64,
    /// Sync to the server now instead of after the debounce window
    #[oai(default)]
    pub immediate: bool,
}

#[derive(Debug, Clone, Object)]
pub struct ErrorDto {
    /// Human-readable error message
    pub message: String,
}

#[derive(ApiResponse)]
pub enum ProgressGetResponse {
    #[oai(status = 200)]
    Ok(Json<ProgressDto>),
}

#[derive(ApiResponse)]
pub enum ProgressPutResponse {
    /// Progress recorded locally and queued for sync
    #[oai(status = 200)]
    Ok(Json<ProgressRecordDto>),

    /// Progress missing, not a number or outside 0 - 100
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum HistoryResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<ProgressRecordDto>>),
}

#[derive(ApiResponse)]
pub enum NoContentResponse {
    #[oai(status = 204)]
    NoContent,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PlaybackTickDto {
    pub position_secs: f64,
    pub duration_secs: f64,
    #[oai(default = "default_playing")]
    pub playing: bool,
    #[oai(default)]
    pub seeking: bool,
}

fn default_playing() -> bool {
    true
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PlaybackCloseDto {
    pub position_secs: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Object)]
pub struct TickResultDto {
    /// False when the tick was throttled or carried no usable position
    pub recorded: bool,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ResumeDto {
    pub content_id: String,
    /// Seconds to seek to; 0 starts from the beginning
    pub position_secs: f64,
}

#[derive(ApiResponse)]
pub enum TickResponse {
    #[oai(status = 200)]
    Ok(Json<TickResultDto>),
}

#[derive(ApiResponse)]
pub enum ResumeResponse {
    #[oai(status = 200)]
    Ok(Json<ResumeDto>),
}
