use chrono::Utc;

use super::store::ProgressStore;
use crate::{domain::mapping::remote_progress_record, streaming_client::RemoteProgressStore};

/// Seed the local store with progress the server holds for items this client has no record of.
///
/// Local records always win, even when the server value is newer: there is no timestamp
/// comparison across the two stores. Seeded records are not synced back. Returns how many
/// records were added.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn reconcile_on_load(
    store: &ProgressStore,
    remote: &dyn RemoteProgressStore,
) -> anyhow::Result<usize> {
    let catalog = remote.list_content().await?;
    let now = Utc::now();
    let mut seeded = 0;
    for item in &catalog {
        let Some(record) = remote_progress_record(item, now) else {
            continue;
        };
        if store.seed(record) {
            tracing::debug!(content_id = %item.id, title = %item.title, progress = item.watch_progress, "seeded progress from server");
            seeded += 1;
        }
    }
    tracing::info!(catalog = catalog.len(), seeded, "reconciled watch history with server");
    Ok(seeded)
}
