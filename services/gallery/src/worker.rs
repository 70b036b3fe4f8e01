use crate::config::WatermarkConfig;
use crate::error::GalleryError;
use crate::metadata_store::PhotoRepository;
use crate::mime::resolve_codec;
use crate::model::{DeleteStatus, ImageRecord, KeyLayout, ProcessingEvent};
use crate::object_store::ObjectStore;
use crate::watermark::apply_watermark;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Runs one processing event end to end: fetch from staging, watermark,
/// publish to the primary bucket, record metadata, drop the staging copy.
///
/// Failures are returned as-is; retrying is the coordinator's job.
pub struct ImageWorker {
    store: Arc<dyn ObjectStore>,
    repository: Arc<dyn PhotoRepository>,
    primary_bucket: String,
    layout: KeyLayout,
    watermark: WatermarkConfig,
}

impl ImageWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repository: Arc<dyn PhotoRepository>,
        primary_bucket: impl Into<String>,
        layout: KeyLayout,
        watermark: WatermarkConfig,
    ) -> Self {
        Self {
            store,
            repository,
            primary_bucket: primary_bucket.into(),
            layout,
            watermark,
        }
    }

    #[instrument(
        skip(self, event),
        fields(object_key = %event.object_key, owner = %event.owner, attempt = event.retry_attempt)
    )]
    pub async fn process(&self, event: &ProcessingEvent) -> Result<ImageRecord, GalleryError> {
        let started = Instant::now();

        let staged = self
            .store
            .get(&event.source_bucket, &event.object_key)
            .await?;

        let content_type = staged.content_type.as_deref().unwrap_or_default();
        let codec = resolve_codec(content_type)?;

        debug!(
            codec = codec.tag(),
            size_bytes = staged.data.len(),
            "Fetched staged upload"
        );

        let watermarked = {
            let data = staged.data.clone();
            let label = event.display_name.clone();
            let config = self.watermark.clone();
            tokio::task::spawn_blocking(move || apply_watermark(&data, codec, &label, &config))
                .await
                .map_err(|e| GalleryError::Processing(format!("watermark task failed: {e}")))??
        };

        let storage_key = self.layout.key_for(DeleteStatus::Active, &event.object_key);
        self.store
            .put(
                &self.primary_bucket,
                &storage_key,
                Bytes::from(watermarked),
                content_type,
            )
            .await?;

        let record = ImageRecord::active(
            &event.object_key,
            &event.owner,
            &event.display_name,
            &storage_key,
        );
        self.repository.upsert(&record).await?;

        self.store
            .delete(&event.source_bucket, &event.object_key)
            .await?;

        metrics::counter!("gallery.images.processed").increment(1);
        metrics::histogram!("gallery.processing.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(
            storage_key = %storage_key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image processed"
        );

        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::memory::{MemoryObjectStore, MemoryPhotoRepository, ObjectOp, RecordOp};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    pub(crate) const STAGING: &str = "gallery-staging";
    pub(crate) const PRIMARY: &str = "gallery-primary";

    pub(crate) fn jpeg_bytes() -> Bytes {
        let image = RgbImage::from_pixel(240, 160, Rgb([30, 60, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    pub(crate) fn worker(
        store: &Arc<MemoryObjectStore>,
        repo: &Arc<MemoryPhotoRepository>,
    ) -> ImageWorker {
        ImageWorker::new(
            store.clone(),
            repo.clone(),
            PRIMARY,
            KeyLayout::default(),
            WatermarkConfig::default(),
        )
    }

    pub(crate) async fn stage(store: &MemoryObjectStore, key: &str, content_type: &str) {
        store
            .put(STAGING, key, jpeg_bytes(), content_type)
            .await
            .unwrap();
    }

    fn event(key: &str) -> ProcessingEvent {
        ProcessingEvent::new(key, STAGING, "u@example.com", "Ada")
    }

    #[tokio::test]
    async fn test_successful_processing() {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(MemoryPhotoRepository::new());
        stage(&store, "abc123", "image/jpeg").await;

        let record = worker(&store, &repo).process(&event("abc123")).await.unwrap();

        assert_eq!(record.photo_id, "abc123");
        assert_eq!(record.owner, "u@example.com");
        assert_eq!(record.display_name, "Ada");
        assert_eq!(record.storage_key, "active/abc123");
        assert_eq!(record.delete_status, DeleteStatus::Active);

        let published = store.object(PRIMARY, "active/abc123").unwrap();
        assert_eq!(published.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(
            image::guess_format(&published.data).unwrap(),
            ImageFormat::Jpeg
        );
        assert!(!store.contains(STAGING, "abc123"));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.record("abc123", "u@example.com"), Some(record));
    }

    #[tokio::test]
    async fn test_missing_staging_object_is_not_found() {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(MemoryPhotoRepository::new());

        let err = worker(&store, &repo).process(&event("gone")).await.unwrap_err();
        assert!(matches!(err, GalleryError::NotFound(_)));
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_type_leaves_staging_in_place() {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(MemoryPhotoRepository::new());
        stage(&store, "doc", "application/pdf").await;

        let err = worker(&store, &repo).process(&event("doc")).await.unwrap_err();
        assert!(matches!(err, GalleryError::Validation(_)));
        assert!(store.contains(STAGING, "doc"));
        assert!(store.keys(PRIMARY).is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_is_transient() {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(MemoryPhotoRepository::new());
        stage(&store, "abc123", "image/jpeg").await;
        store.fail_always(ObjectOp::Get);

        let err = worker(&store, &repo).process(&event("abc123")).await.unwrap_err();
        assert!(matches!(err, GalleryError::TransientStore(_)));
        assert!(store.contains(STAGING, "abc123"));
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_staging_copy() {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(MemoryPhotoRepository::new());
        stage(&store, "abc123", "image/jpeg").await;
        repo.fail_times(RecordOp::Upsert, 1);

        let err = worker(&store, &repo).process(&event("abc123")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.contains(STAGING, "abc123"));

        // A later attempt overwrites the published copy and completes
        let record = worker(&store, &repo).process(&event("abc123")).await.unwrap();
        assert_eq!(record.storage_key, "active/abc123");
        assert!(!store.contains(STAGING, "abc123"));
    }
}
