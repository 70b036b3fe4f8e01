use crate::config::S3Config;
use crate::error::GalleryError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

/// An object read back from the store
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    /// Declared content type, if the store recorded one
    pub content_type: Option<String>,
}

/// Object storage used for both the staging and the primary bucket.
///
/// `get` and `copy` fail with [`GalleryError::NotFound`] when the source key is
/// absent; every other failure is a [`GalleryError::TransientStore`]. Deleting
/// a missing key succeeds.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, GalleryError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GalleryError>;

    /// Server-side copy within one bucket
    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), GalleryError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), GalleryError>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            staging_bucket = %config.staging_bucket,
            primary_bucket = %config.primary_bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes.max(1),
        })
    }

    /// Single-part upload for small objects
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GalleryError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify(e, "put object"))?;

        Ok(())
    }

    /// Multipart upload for large objects
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GalleryError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify(e, "create multipart upload"))?;

        let upload_id = create_response.upload_id().ok_or_else(|| {
            GalleryError::TransientStore("no upload id in multipart response".to_string())
        })?;

        match self.upload_parts(bucket, key, upload_id, &data).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| classify(e, "complete multipart upload"))?;
                Ok(())
            }
            Err(e) => {
                // Leave no orphaned parts behind
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(error = %DisplayErrorContext(&abort), key = %key, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        data: &Bytes,
    ) -> Result<Vec<CompletedPart>, GalleryError> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in data.chunks(self.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;
            let response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.slice_ref(chunk)))
                .send()
                .await
                .map_err(|e| classify(e, "upload part"))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(bucket = %bucket, key = %key))]
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, GalleryError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, "get object"))?;

        let content_type = response.content_type().map(String::from);
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| GalleryError::TransientStore(format!("read object body: {e}")))?
            .into_bytes();

        debug!(size_bytes = data.len(), content_type = ?content_type, "Object fetched");

        Ok(StoredObject { data, content_type })
    }

    #[instrument(skip(self, data), fields(bucket = %bucket, key = %key, size_bytes = data.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GalleryError> {
        if data.len() > self.multipart_threshold_bytes {
            self.multipart_upload(bucket, key, data, content_type).await
        } else {
            self.simple_upload(bucket, key, data, content_type).await
        }
    }

    #[instrument(skip(self), fields(bucket = %bucket, src_key = %src_key, dst_key = %dst_key))]
    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), GalleryError> {
        self.client
            .copy_object()
            .copy_source(copy_source(bucket, src_key))
            .bucket(bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| classify(e, "copy object"))?;

        debug!("Object copied");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %bucket, key = %key))]
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), GalleryError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, "delete object"))?;

        debug!("Object deleted");
        Ok(())
    }
}

/// Key characters left as-is in a copy source: unreserved ones and '/'
const COPY_SOURCE_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// `bucket/key` with the key percent-encoded, as CopyObject expects
fn copy_source(bucket: &str, key: &str) -> String {
    format!(
        "{bucket}/{}",
        percent_encoding::utf8_percent_encode(key, &COPY_SOURCE_ENCODE_SET)
    )
}

/// Missing keys are not-found, everything else is worth retrying
fn classify<E, R>(err: SdkError<E, R>, operation: &str) -> GalleryError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    if is_missing_key(err.code()) {
        return GalleryError::NotFound(format!("{operation}: {}", err.message().unwrap_or("no such key")));
    }
    GalleryError::TransientStore(format!("{operation}: {}", DisplayErrorContext(&err)))
}

fn is_missing_key(code: Option<&str>) -> bool {
    matches!(code, Some("NoSuchKey") | Some("NotFound") | Some("404"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_codes() {
        assert!(is_missing_key(Some("NoSuchKey")));
        assert!(is_missing_key(Some("NotFound")));
        assert!(!is_missing_key(Some("SlowDown")));
        assert!(!is_missing_key(Some("AccessDenied")));
        assert!(!is_missing_key(None));
    }

    #[test]
    fn test_copy_source_encodes_key() {
        assert_eq!(
            copy_source("gallery-primary", "active/0b6f1c2e-9a"),
            "gallery-primary/active/0b6f1c2e-9a"
        );
        assert_eq!(
            copy_source("gallery-primary", "my photos/a+b?.jpg"),
            "gallery-primary/my%20photos/a%2Bb%3F.jpg"
        );
    }
}
