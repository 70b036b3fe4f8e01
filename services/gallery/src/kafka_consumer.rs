use crate::config::KafkaConfig;
use crate::coordinator::{ProcessingOutcome, RetryCoordinator};
use crate::error::GalleryError;
use crate::model::ProcessingEvent;
use crate::producer::apply_security;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause before a message whose retry could not be handed off is read again
const REDELIVERY_BACKOFF: Duration = Duration::from_secs(5);

/// What happens to a message's offset once the coordinator has returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetAction {
    /// Done with this message, successfully or for good
    Commit,
    /// The next attempt never reached the dispatcher; read this one again
    Redeliver,
}

/// Retries travel as new messages, so only a failed hand-off of the next
/// attempt keeps the current message alive.
pub fn offset_action(result: &Result<ProcessingOutcome, GalleryError>) -> OffsetAction {
    match result {
        Err(GalleryError::DispatchFailed { .. }) => OffsetAction::Redeliver,
        _ => OffsetAction::Commit,
    }
}

/// Kafka consumer feeding processing events to the retry coordinator.
///
/// Messages are handled one at a time. The offset is committed once the
/// coordinator returns, except when the re-dispatch of the next attempt
/// failed: then the consumer seeks back and the same attempt runs again.
pub struct ProcessingConsumer {
    consumer: StreamConsumer,
    coordinator: Arc<RetryCoordinator>,
}

impl ProcessingConsumer {
    pub fn new(config: &KafkaConfig, coordinator: Arc<RetryCoordinator>) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string());

        apply_security(&mut client_config, config);

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.processing_topic])
            .context("Failed to subscribe to processing topic")?;

        info!(
            topic = %config.processing_topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            coordinator,
        })
    }

    /// Consume until `shutdown` is cancelled or the stream ends
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting processing consumer");

        let mut message_stream = self.consumer.stream();

        loop {
            let message_result = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Processing consumer stopping");
                    break;
                }
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            match message_result {
                Ok(message) => match self.process_message(&message).await {
                    OffsetAction::Commit => {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                    }
                    OffsetAction::Redeliver => {
                        metrics::counter!("gallery.messages.redelivered").increment(1);
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!("Processing consumer stopping before redelivery");
                                break;
                            }
                            _ = tokio::time::sleep(REDELIVERY_BACKOFF) => {}
                        }
                        self.rewind(&message);
                    }
                },
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("gallery.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Move the partition back so `message` is fetched again
    fn rewind(&self, message: &BorrowedMessage<'_>) {
        match self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            Duration::from_secs(5),
        ) {
            Ok(()) => info!(
                partition = message.partition(),
                offset = message.offset(),
                "Rewound to redeliver processing event"
            ),
            Err(e) => error!(
                error = %e,
                partition = message.partition(),
                offset = message.offset(),
                "Failed to rewind, processing event left uncommitted"
            ),
        }
    }

    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> OffsetAction {
        let event = match parse_event(message.payload()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed processing event");
                metrics::counter!("gallery.messages.rejected").increment(1);
                return OffsetAction::Commit;
            }
        };

        debug!(
            object_key = %event.object_key,
            attempt = event.retry_attempt,
            "Received processing event"
        );

        let result = self.coordinator.handle(&event).await;
        match &result {
            Ok(ProcessingOutcome::Completed(record)) => {
                metrics::counter!("gallery.messages.processed").increment(1);
                debug!(storage_key = %record.storage_key, "Processing event completed");
            }
            Ok(ProcessingOutcome::Rescheduled { next_attempt }) => {
                metrics::counter!("gallery.messages.processed").increment(1);
                debug!(next_attempt, "Processing event rescheduled");
            }
            Err(e) => {
                metrics::counter!("gallery.messages.failed", "kind" => e.kind()).increment(1);
                error!(
                    error = %e,
                    object_key = %event.object_key,
                    attempt = event.retry_attempt,
                    "Processing event failed"
                );
            }
        }

        offset_action(&result)
    }
}

/// Decode a message payload into a processing event
pub fn parse_event(payload: Option<&[u8]>) -> Result<ProcessingEvent, GalleryError> {
    let payload =
        payload.ok_or_else(|| GalleryError::Validation("message has no payload".to_string()))?;
    serde_json::from_slice(payload)
        .map_err(|e| GalleryError::Validation(format!("malformed processing event: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RetryPolicy;
    use crate::dispatch::{MockDispatcher, MockNotifier};
    use crate::memory::{MemoryObjectStore, MemoryPhotoRepository, ObjectOp};
    use crate::model::ImageRecord;
    use crate::worker::tests::{stage, worker, STAGING};

    #[test]
    fn test_offset_action_per_result() {
        let record = ImageRecord::active("abc123", "u@example.com", "Ada", "active/abc123");
        assert_eq!(
            offset_action(&Ok(ProcessingOutcome::Completed(record))),
            OffsetAction::Commit
        );
        assert_eq!(
            offset_action(&Ok(ProcessingOutcome::Rescheduled { next_attempt: 2 })),
            OffsetAction::Commit
        );
        assert_eq!(
            offset_action(&Err(GalleryError::Validation("pdf".into()))),
            OffsetAction::Commit
        );
        assert_eq!(
            offset_action(&Err(GalleryError::RetriesExhausted {
                object_key: "abc123".into(),
                attempt: 3,
                source: Box::new(GalleryError::TransientStore("s3 down".into())),
            })),
            OffsetAction::Commit
        );
        assert_eq!(
            offset_action(&Err(GalleryError::DispatchFailed {
                object_key: "abc123".into(),
                attempt: 1,
                source: Box::new(GalleryError::TransientStore("broker down".into())),
            })),
            OffsetAction::Redeliver
        );
    }

    #[tokio::test]
    async fn test_lost_retry_keeps_message_until_handed_off() {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(MemoryPhotoRepository::new());
        stage(&store, "abc123", "image/jpeg").await;
        store.fail_always(ObjectOp::Get);

        let mut dispatcher = MockDispatcher::new();
        let mut calls = 0;
        dispatcher.expect_dispatch().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(GalleryError::TransientStore("broker down".into()))
            } else {
                Ok(())
            }
        });
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().never();

        let coordinator = RetryCoordinator::new(
            Arc::new(worker(&store, &repo)),
            store.clone(),
            Arc::new(dispatcher),
            Arc::new(notifier),
            RetryPolicy::default(),
        );

        let event = ProcessingEvent::new("abc123", STAGING, "u@example.com", "Ada");
        let first = coordinator.handle(&event).await;
        assert_eq!(offset_action(&first), OffsetAction::Redeliver);
        assert!(store.contains(STAGING, "abc123"));

        // Same attempt read again once the broker is back
        let second = coordinator.handle(&event).await;
        assert_eq!(offset_action(&second), OffsetAction::Commit);
        assert!(matches!(
            second,
            Ok(ProcessingOutcome::Rescheduled { next_attempt: 1 })
        ));
    }

    #[test]
    fn test_parse_first_attempt_without_counter() {
        let json = br#"{
            "objectKey": "0b6f1c2e",
            "sourceBucket": "gallery-staging",
            "owner": "u@example.com",
            "displayName": "Ada"
        }"#;

        let event = parse_event(Some(json)).unwrap();
        assert_eq!(event.object_key, "0b6f1c2e");
        assert_eq!(event.source_bucket, "gallery-staging");
        assert_eq!(event.retry_attempt, 0);
    }

    #[test]
    fn test_parse_redispatched_event() {
        let json = br#"{"objectKey":"k","sourceBucket":"s","owner":"o","displayName":"d","retryAttempt":2}"#;
        assert_eq!(parse_event(Some(json)).unwrap().retry_attempt, 2);
    }

    #[test]
    fn test_malformed_payloads_are_validation_errors() {
        assert!(matches!(parse_event(None), Err(GalleryError::Validation(_))));
        assert!(matches!(
            parse_event(Some(b"not json")),
            Err(GalleryError::Validation(_))
        ));
        assert!(matches!(
            parse_event(Some(br#"{"objectKey":"k"}"#)),
            Err(GalleryError::Validation(_))
        ));
    }
}
