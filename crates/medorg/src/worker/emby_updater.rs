//! Worker: moved -> completed.
//!
//! Triggers a targeted rescan, waits for the media server to index the moved
//! file, writes the catalog metadata through, and refreshes the item's
//! images. Image failures are warnings; everything else maps to an `error`
//! transition with a classifier message.

use std::time::Duration;

use tracing::{info, warn};

use super::Worker;
use crate::catalog::CatalogRecord;
use crate::emby::{item_id, EmbyClient};
use crate::error::QueueError;
use crate::queue::{ItemStatus, QueueItem, QueueStore, UpdateFields};

struct UpdateFailure {
    message: String,
    /// Populated when the failure happened after the item was located.
    emby_item_id: Option<String>,
}

impl UpdateFailure {
    fn new(message: String) -> Self {
        Self {
            message,
            emby_item_id: None,
        }
    }

    fn with_item(message: String, emby_item_id: String) -> Self {
        Self {
            message,
            emby_item_id: Some(emby_item_id),
        }
    }
}

pub struct EmbyUpdater {
    store: QueueStore,
    emby: Option<EmbyClient>,
    poll_interval: Duration,
}

impl EmbyUpdater {
    pub fn new(store: QueueStore, emby: Option<EmbyClient>, poll_interval: Duration) -> Self {
        Self {
            store,
            emby,
            poll_interval,
        }
    }

    async fn update_item(
        &self,
        emby: &EmbyClient,
        item: &QueueItem,
    ) -> Result<UpdateFields, UpdateFailure> {
        let new_path = item.new_path.clone().ok_or_else(|| {
            UpdateFailure::new("Item not indexed: row has no destination path".to_string())
        })?;

        let folder_id = emby.parent_folder_id().to_string();
        emby.refresh_folder(&folder_id).await.map_err(|e| {
            UpdateFailure::new(format!("Rescan failure for parent folder {folder_id}: {e}"))
        })?;

        let emby_item = emby.wait_for_item(&new_path).await.ok_or_else(|| {
            UpdateFailure::new(format!("Item not indexed for path: {new_path}"))
        })?;
        let emby_item_id = item_id(&emby_item).ok_or_else(|| {
            UpdateFailure::new(format!("Item not indexed for path: {new_path}"))
        })?;
        info!(id = item.id, emby_item_id = %emby_item_id, "item indexed");

        match item.metadata_json.as_ref().and_then(CatalogRecord::from_value) {
            Some(record) => {
                emby.update_item_metadata(&emby_item_id, &record)
                    .await
                    .map_err(|e| {
                        UpdateFailure::with_item(
                            format!("Metadata write failure for item {emby_item_id}: {e}"),
                            emby_item_id.clone(),
                        )
                    })?;

                // Best-effort: image problems never fail the row.
                match record.image_url() {
                    Some(image_url) => {
                        emby.upload_item_images(&emby_item_id, image_url).await;
                    }
                    None => info!(id = item.id, "no image URL in metadata"),
                }
            }
            None => warn!(
                id = item.id,
                "row has no usable catalog metadata, skipping metadata write"
            ),
        }

        Ok(UpdateFields {
            emby_item_id: Some(emby_item_id),
            ..Default::default()
        })
    }
}

impl Worker for EmbyUpdater {
    fn name(&self) -> &'static str {
        "emby-updater"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn process_one(&self) -> Result<bool, QueueError> {
        let Some(emby) = &self.emby else {
            return Ok(false);
        };
        let Some(item) = self.store.claim_moved().await? else {
            return Ok(false);
        };
        info!(id = item.id, path = item.new_path.as_deref().unwrap_or(""), "updating media server");

        match self.update_item(emby, &item).await {
            Ok(fields) => {
                self.store
                    .update_status(item.id, ItemStatus::Completed, fields)
                    .await?;
                info!(id = item.id, "item completed");
            }
            Err(failure) => {
                warn!(id = item.id, error = %failure.message, "media server update failed");
                self.store
                    .update_status(
                        item.id,
                        ItemStatus::Error,
                        UpdateFields {
                            error_message: Some(failure.message),
                            emby_item_id: failure.emby_item_id,
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(true)
    }
}
