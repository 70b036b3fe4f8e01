//! Error taxonomy shared by every gallery component.
//!
//! Validation and not-found failures are fatal for the operation that
//! raised them. Transient store and processing failures are handed to the
//! retry coordinator. Conflicts come out of recycle-bin transitions that
//! stopped half way.

use std::fmt;
use thiserror::Error;

/// Step of a recycle-bin transition that was reached before it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStage {
    /// Object copied to the target prefix, source still present
    DeleteSource,
    /// Object moved, metadata record not yet updated
    UpdateRecord,
    /// Recycled object removed, metadata record still present
    DeleteRecord,
}

impl fmt::Display for TransitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TransitionStage::DeleteSource => "delete-source",
            TransitionStage::UpdateRecord => "update-record",
            TransitionStage::DeleteRecord => "delete-record",
        };
        f.write_str(stage)
    }
}

/// Errors raised by the processing pipeline and the recycle bin
#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    TransientStore(String),

    #[error("Image processing failed: {0}")]
    Processing(String),

    #[error("Photo {photo_id} left inconsistent at stage {stage}: {message}")]
    Conflict {
        photo_id: String,
        stage: TransitionStage,
        message: String,
    },

    /// The retry for `attempt + 1` never reached the dispatcher; the event
    /// at `attempt` must be delivered again
    #[error("Could not re-dispatch {object_key} after attempt {attempt}: {source}")]
    DispatchFailed {
        object_key: String,
        attempt: u8,
        #[source]
        source: Box<GalleryError>,
    },

    #[error("Giving up on {object_key} after attempt {attempt}: {source}")]
    RetriesExhausted {
        object_key: String,
        attempt: u8,
        #[source]
        source: Box<GalleryError>,
    },
}

impl GalleryError {
    /// Whether the retry coordinator may re-dispatch after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GalleryError::TransientStore(_) | GalleryError::Processing(_)
        )
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GalleryError::Validation(_) => "validation",
            GalleryError::NotFound(_) => "not_found",
            GalleryError::TransientStore(_) => "transient_store",
            GalleryError::Processing(_) => "processing",
            GalleryError::Conflict { .. } => "conflict",
            GalleryError::DispatchFailed { .. } => "dispatch_failed",
            GalleryError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl From<sqlx::Error> for GalleryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => GalleryError::NotFound("metadata record".to_string()),
            other => GalleryError::TransientStore(other.to_string()),
        }
    }
}

impl From<image::ImageError> for GalleryError {
    fn from(err: image::ImageError) -> Self {
        GalleryError::Processing(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GalleryError::TransientStore("s3 down".into()).is_retryable());
        assert!(GalleryError::Processing("bad jpeg".into()).is_retryable());
        assert!(!GalleryError::Validation("pdf".into()).is_retryable());
        assert!(!GalleryError::NotFound("abc".into()).is_retryable());

        let conflict = GalleryError::Conflict {
            photo_id: "abc".into(),
            stage: TransitionStage::UpdateRecord,
            message: "db down".into(),
        };
        assert!(!conflict.is_retryable());

        let lost_retry = GalleryError::DispatchFailed {
            object_key: "abc".into(),
            attempt: 1,
            source: Box::new(GalleryError::TransientStore("broker down".into())),
        };
        assert!(!lost_retry.is_retryable());
        assert_eq!(lost_retry.kind(), "dispatch_failed");
    }

    #[test]
    fn test_conflict_message_names_stage() {
        let err = GalleryError::Conflict {
            photo_id: "abc123".into(),
            stage: TransitionStage::DeleteSource,
            message: "timeout".into(),
        };
        let text = err.to_string();
        assert!(text.contains("abc123"));
        assert!(text.contains("delete-source"));
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: GalleryError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), "not_found");
    }
}
