use crate::error::{GalleryError, TransitionStage};
use crate::metadata_store::PhotoRepository;
use crate::model::{DeleteStatus, KeyLayout, RecycleDirection, RecycleTransition};
use crate::object_store::ObjectStore;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Soft-delete and restore of published photos.
///
/// A transition is copy, delete source, update record, in that order, with
/// no rollback. A failure after the copy leaves the object and its record
/// disagreeing and is reported as [`GalleryError::Conflict`]. Concurrent
/// transitions of the same photo are not serialized here; callers that need
/// exact consistency must serialize per photo.
pub struct RecycleBin {
    store: Arc<dyn ObjectStore>,
    repository: Arc<dyn PhotoRepository>,
    primary_bucket: String,
    layout: KeyLayout,
}

impl RecycleBin {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repository: Arc<dyn PhotoRepository>,
        primary_bucket: impl Into<String>,
        layout: KeyLayout,
    ) -> Self {
        Self {
            store,
            repository,
            primary_bucket: primary_bucket.into(),
            layout,
        }
    }

    #[instrument(
        skip(self, command),
        fields(photo_id = %command.photo_id, owner = %command.owner, direction = ?command.direction)
    )]
    pub async fn transition(&self, command: &RecycleTransition) -> Result<(), GalleryError> {
        let RecycleTransition {
            photo_id,
            owner,
            direction,
        } = command;

        let record = self
            .repository
            .get(photo_id, owner)
            .await?
            .ok_or_else(|| GalleryError::NotFound(format!("photo {photo_id} for owner {owner}")))?;

        // The current status is not a guard: a repeated transition re-runs the copy
        if record.delete_status == direction.target() {
            warn!(
                storage_key = %record.storage_key,
                "Photo already in target namespace, repeating transition"
            );
        }

        let source_key = self.layout.key_for(direction.source(), photo_id);
        let target_key = self.layout.key_for(direction.target(), photo_id);

        self.store
            .copy(&self.primary_bucket, &source_key, &target_key)
            .await?;

        if let Err(e) = self.store.delete(&self.primary_bucket, &source_key).await {
            return Err(self.conflict(photo_id, TransitionStage::DeleteSource, e));
        }

        if let Err(e) = self
            .repository
            .update_location(photo_id, owner, &target_key, direction.target())
            .await
        {
            return Err(self.conflict(photo_id, TransitionStage::UpdateRecord, e));
        }

        metrics::counter!("gallery.recycle.transitions", "direction" => direction_label(*direction))
            .increment(1);
        info!(from = %source_key, to = %target_key, "Recycle transition completed");

        Ok(())
    }

    /// Permanently remove a recycled photo and its record
    #[instrument(skip(self))]
    pub async fn purge(&self, photo_id: &str, owner: &str) -> Result<(), GalleryError> {
        let record = self
            .repository
            .get(photo_id, owner)
            .await?
            .ok_or_else(|| GalleryError::NotFound(format!("photo {photo_id} for owner {owner}")))?;

        if record.delete_status != DeleteStatus::Recycled {
            warn!(storage_key = %record.storage_key, "Purging a photo that is not in the recycle bin");
        }

        let recycled_key = self.layout.key_for(DeleteStatus::Recycled, photo_id);
        self.store.delete(&self.primary_bucket, &recycled_key).await?;

        if let Err(e) = self.repository.delete(photo_id, owner).await {
            return Err(self.conflict(photo_id, TransitionStage::DeleteRecord, e));
        }

        info!(storage_key = %recycled_key, "Photo purged");
        Ok(())
    }

    fn conflict(&self, photo_id: &str, stage: TransitionStage, cause: GalleryError) -> GalleryError {
        metrics::counter!("gallery.recycle.conflicts").increment(1);
        error!(
            photo_id = %photo_id,
            stage = %stage,
            error = %cause,
            "Transition stopped part way, object and record disagree"
        );
        GalleryError::Conflict {
            photo_id: photo_id.to_string(),
            stage,
            message: cause.to_string(),
        }
    }
}

fn direction_label(direction: RecycleDirection) -> &'static str {
    match direction {
        RecycleDirection::ToRecycle => "to-recycle",
        RecycleDirection::Restore => "restore",
    }
}
