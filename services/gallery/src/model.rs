//! Records and messages that flow through the gallery.

use crate::config::S3Config;
use crate::error::GalleryError;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Value of the `type` attribute on every photo record; backs the global scan index
pub const PHOTO_RECORD_TYPE: &str = "photo";

/// Highest `retryAttempt` ever put on the wire
pub const MAX_RETRY_ATTEMPT: u8 = 3;

/// Which namespace of the primary bucket a photo currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum DeleteStatus {
    Active,
    Recycled,
}

impl From<DeleteStatus> for i16 {
    fn from(status: DeleteStatus) -> Self {
        match status {
            DeleteStatus::Active => 0,
            DeleteStatus::Recycled => 1,
        }
    }
}

impl TryFrom<i16> for DeleteStatus {
    type Error = GalleryError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeleteStatus::Active),
            1 => Ok(DeleteStatus::Recycled),
            other => Err(GalleryError::Validation(format!(
                "unknown delete status {other}"
            ))),
        }
    }
}

/// Persistent metadata for one photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub photo_id: String,
    pub owner: String,
    /// Rendered as the watermark label
    pub display_name: String,
    /// Current location in the primary bucket, prefix included
    pub storage_key: String,
    pub upload_timestamp: String,
    pub delete_status: DeleteStatus,
    #[serde(rename = "type")]
    pub record_type: String,
}

impl ImageRecord {
    /// Fresh active record for a photo that just finished processing
    pub fn active(
        photo_id: impl Into<String>,
        owner: impl Into<String>,
        display_name: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            photo_id: photo_id.into(),
            owner: owner.into(),
            display_name: display_name.into(),
            storage_key: storage_key.into(),
            upload_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            delete_status: DeleteStatus::Active,
            record_type: PHOTO_RECORD_TYPE.to_string(),
        }
    }
}

/// One unit of processing work for an upload sitting in staging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingEvent {
    pub object_key: String,
    pub source_bucket: String,
    pub owner: String,
    pub display_name: String,
    #[serde(default)]
    pub retry_attempt: u8,
}

impl ProcessingEvent {
    /// First-attempt event for a new upload
    pub fn new(
        object_key: impl Into<String>,
        source_bucket: impl Into<String>,
        owner: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            source_bucket: source_bucket.into(),
            owner: owner.into(),
            display_name: display_name.into(),
            retry_attempt: 0,
        }
    }

    /// Same upload, next attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_attempt: self.retry_attempt.saturating_add(1),
            ..self.clone()
        }
    }

    /// Reject payloads the worker cannot act on
    pub fn validate(&self, max_attempts: u8) -> Result<(), GalleryError> {
        if self.object_key.is_empty() || self.object_key.contains('/') {
            return Err(GalleryError::Validation(format!(
                "invalid object key {:?}",
                self.object_key
            )));
        }
        if self.source_bucket.is_empty() {
            return Err(GalleryError::Validation("missing source bucket".to_string()));
        }
        if self.owner.is_empty() {
            return Err(GalleryError::Validation("missing owner".to_string()));
        }
        if self.retry_attempt > max_attempts {
            return Err(GalleryError::Validation(format!(
                "retry attempt {} exceeds limit {}",
                self.retry_attempt, max_attempts
            )));
        }
        Ok(())
    }
}

/// Direction of a recycle-bin move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecycleDirection {
    ToRecycle,
    Restore,
}

impl RecycleDirection {
    /// Namespace the photo is expected to leave
    pub fn source(self) -> DeleteStatus {
        match self {
            RecycleDirection::ToRecycle => DeleteStatus::Active,
            RecycleDirection::Restore => DeleteStatus::Recycled,
        }
    }

    /// Namespace the photo ends up in
    pub fn target(self) -> DeleteStatus {
        match self {
            RecycleDirection::ToRecycle => DeleteStatus::Recycled,
            RecycleDirection::Restore => DeleteStatus::Active,
        }
    }
}

/// Caller command moving a photo into or out of the recycle bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecycleTransition {
    pub photo_id: String,
    pub owner: String,
    pub direction: RecycleDirection,
}

impl RecycleTransition {
    pub fn to_recycle(photo_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            photo_id: photo_id.into(),
            owner: owner.into(),
            direction: RecycleDirection::ToRecycle,
        }
    }

    pub fn restore(photo_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            photo_id: photo_id.into(),
            owner: owner.into(),
            direction: RecycleDirection::Restore,
        }
    }
}

/// Key prefixes of the primary bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    active_prefix: String,
    recycle_prefix: String,
}

impl KeyLayout {
    pub fn new(active_prefix: impl Into<String>, recycle_prefix: impl Into<String>) -> Self {
        Self {
            active_prefix: active_prefix.into(),
            recycle_prefix: recycle_prefix.into(),
        }
    }

    pub fn from_config(config: &S3Config) -> Self {
        Self::new(&config.active_prefix, &config.recycle_prefix)
    }

    /// Object key of `photo_id` inside the given namespace
    pub fn key_for(&self, namespace: DeleteStatus, photo_id: &str) -> String {
        let prefix = match namespace {
            DeleteStatus::Active => &self.active_prefix,
            DeleteStatus::Recycled => &self.recycle_prefix,
        };
        format!("{}/{}", prefix.trim_end_matches('/'), photo_id)
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("active", "recycle")
    }
}
