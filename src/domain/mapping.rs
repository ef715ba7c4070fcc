// Mapping from streaming API DTOs to domain models

use chrono::{DateTime, Utc};

use super::models::ProgressRecord;
use crate::streaming_client::StreamingContent;

/// Progress the server holds for a catalog item, or `None` when the item was never started.
///
/// The server does not track when progress last changed; `updatedAt` is used when present and
/// `fallback` otherwise.
pub fn remote_progress_record(
    item: &StreamingContent,
    fallback: DateTime<Utc>,
) -> Option<ProgressRecord> {
    if !item.watch_progress.is_finite() || item.watch_progress <= 0.0 {
        return None;
    }
    Some(ProgressRecord::new(
        item.id.clone(),
        item.watch_progress,
        item.updated_at.unwrap_or(fallback),
    ))
}
