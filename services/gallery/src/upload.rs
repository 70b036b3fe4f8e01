use crate::coordinator::{ProcessingOutcome, RetryCoordinator};
use crate::error::GalleryError;
use crate::mime::{detect_content_type, resolve_codec};
use crate::model::ProcessingEvent;
use crate::object_store::ObjectStore;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Intake for new photos: stage the bytes, then run the first attempt inline.
///
/// Later attempts, if any, go through the dispatcher and are not awaited here.
pub struct UploadService {
    store: Arc<dyn ObjectStore>,
    coordinator: Arc<RetryCoordinator>,
    staging_bucket: String,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        coordinator: Arc<RetryCoordinator>,
        staging_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            coordinator,
            staging_bucket: staging_bucket.into(),
        }
    }

    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn submit(
        &self,
        data: Bytes,
        owner: &str,
        display_name: &str,
    ) -> Result<ProcessingOutcome, GalleryError> {
        if owner.is_empty() {
            return Err(GalleryError::Validation("missing owner".to_string()));
        }

        let content_type = detect_content_type(&data)?;
        let codec = resolve_codec(content_type)?;

        let object_key = Uuid::new_v4().to_string();
        self.store
            .put(&self.staging_bucket, &object_key, data, codec.content_type())
            .await?;

        metrics::counter!("gallery.uploads.staged", "codec" => codec.tag()).increment(1);
        info!(object_key = %object_key, codec = codec.tag(), "Upload staged");

        let event = ProcessingEvent::new(object_key, &self.staging_bucket, owner, display_name);
        self.coordinator.handle(&event).await
    }

    /// Same as [`UploadService::submit`] for a base64 encoded body
    pub async fn submit_base64(
        &self,
        encoded: &str,
        owner: &str,
        display_name: &str,
    ) -> Result<ProcessingOutcome, GalleryError> {
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|e| GalleryError::Validation(format!("invalid base64 body: {e}")))?;
        self.submit(Bytes::from(data), owner, display_name).await
    }
}
