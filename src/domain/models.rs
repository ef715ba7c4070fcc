// Domain models shared by the local store, the sync dispatcher and the local API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Watch progress for one content item, as kept in the durable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub content_id: String,
    /// Percent watched, 0.0 - 100.0
    pub progress: f64,
    pub last_watched: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(content_id: impl Into<String>, progress: f64, last_watched: DateTime<Utc>) -> Self {
        Self {
            content_id: content_id.into(),
            progress,
            last_watched,
        }
    }

    pub fn is_started(&self) -> bool {
        self.progress > 0.0
    }
}
