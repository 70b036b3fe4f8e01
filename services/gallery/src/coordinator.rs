use crate::config::RetryConfig;
use crate::dispatch::{Dispatcher, NotificationMessage, Notifier};
use crate::error::GalleryError;
use crate::model::{ImageRecord, ProcessingEvent, MAX_RETRY_ATTEMPT};
use crate::object_store::ObjectStore;
use crate::worker::ImageWorker;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What to do after a retryable failure at a given attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureAction {
    /// Tell the owner that processing is delayed
    pub notify: bool,
    /// Attempt number to re-dispatch with, if any
    pub redispatch: Option<u8>,
    /// Remove the orphaned staging object
    pub cleanup_staging: bool,
}

/// Bounded retry policy keyed by the attempt counter carried in the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u8,
    notify_on_attempt: u8,
}

impl RetryPolicy {
    /// `max_attempts` is capped at [`MAX_RETRY_ATTEMPT`]
    pub fn new(max_attempts: u8, notify_on_attempt: u8) -> Self {
        Self {
            max_attempts: max_attempts.min(MAX_RETRY_ATTEMPT),
            notify_on_attempt,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.notify_on_attempt)
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Re-dispatch with `attempt + 1` until `max_attempts`, notify once at
    /// `notify_on_attempt`, clean up staging when the budget is spent.
    pub fn on_failure(&self, attempt: u8) -> FailureAction {
        let exhausted = attempt >= self.max_attempts;
        FailureAction {
            notify: attempt == self.notify_on_attempt,
            redispatch: (!exhausted).then(|| attempt + 1),
            cleanup_staging: exhausted,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Result of one coordinated invocation that did not end in an error
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    /// The photo is published and recorded
    Completed(ImageRecord),
    /// This attempt failed; the upload was handed back to the dispatcher
    Rescheduled { next_attempt: u8 },
}

/// Wraps a single worker invocation and applies the retry policy to its failure
pub struct RetryCoordinator {
    worker: Arc<ImageWorker>,
    store: Arc<dyn ObjectStore>,
    dispatcher: Arc<dyn Dispatcher>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(
        worker: Arc<ImageWorker>,
        store: Arc<dyn ObjectStore>,
        dispatcher: Arc<dyn Dispatcher>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            worker,
            store,
            dispatcher,
            notifier,
            policy,
        }
    }

    /// Process `event` once. Fatal errors surface untouched; retryable ones are
    /// re-dispatched until the attempt budget runs out, then surface as
    /// [`GalleryError::RetriesExhausted`]. A re-dispatch the dispatcher refused
    /// surfaces as [`GalleryError::DispatchFailed`] so the caller can run this
    /// attempt again.
    #[instrument(
        skip(self, event),
        fields(object_key = %event.object_key, attempt = event.retry_attempt)
    )]
    pub async fn handle(&self, event: &ProcessingEvent) -> Result<ProcessingOutcome, GalleryError> {
        event.validate(self.policy.max_attempts())?;

        let err = match self.worker.process(event).await {
            Ok(record) => return Ok(ProcessingOutcome::Completed(record)),
            Err(err) => err,
        };

        metrics::counter!("gallery.processing.failed", "kind" => err.kind()).increment(1);

        if !err.is_retryable() {
            warn!(error = %err, kind = err.kind(), "Processing failed permanently, not retrying");
            return Err(err);
        }

        let action = self.policy.on_failure(event.retry_attempt);

        if action.notify {
            self.notify_owner(event).await;
        }

        if let Some(next_attempt) = action.redispatch {
            let retry = event.next_attempt();
            debug_assert_eq!(retry.retry_attempt, next_attempt);

            if let Err(dispatch_err) = self.dispatcher.dispatch(retry).await {
                error!(
                    error = %dispatch_err,
                    cause = %err,
                    "Failed to re-dispatch processing event"
                );
                return Err(GalleryError::DispatchFailed {
                    object_key: event.object_key.clone(),
                    attempt: event.retry_attempt,
                    source: Box::new(dispatch_err),
                });
            }

            metrics::counter!("gallery.processing.redispatched").increment(1);
            info!(error = %err, next_attempt, "Processing failed, re-dispatched");
            return Ok(ProcessingOutcome::Rescheduled { next_attempt });
        }

        if action.cleanup_staging {
            if let Err(cleanup_err) = self
                .store
                .delete(&event.source_bucket, &event.object_key)
                .await
            {
                warn!(error = %cleanup_err, "Failed to remove orphaned staging object");
            }
        }

        metrics::counter!("gallery.processing.abandoned").increment(1);
        error!(error = %err, "Retry budget exhausted, giving up");

        Err(GalleryError::RetriesExhausted {
            object_key: event.object_key.clone(),
            attempt: event.retry_attempt,
            source: Box::new(err),
        })
    }

    /// Best effort; a lost notification never blocks the retry chain
    async fn notify_owner(&self, event: &ProcessingEvent) {
        match self
            .notifier
            .notify(NotificationMessage::processing_delayed(event))
            .await
        {
            Ok(()) => {
                metrics::counter!("gallery.notifications.sent").increment(1);
                info!(recipient = %event.owner, "Owner notified of processing delay");
            }
            Err(e) => warn!(error = %e, recipient = %event.owner, "Failed to notify owner"),
        }
    }
}
