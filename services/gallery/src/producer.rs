//! Kafka producer behind the dispatcher and notifier seams.
//!
//! Re-dispatched processing events go to the processing topic keyed by
//! object key, so every attempt of one upload lands on the same partition.
//! Notifications go to the notification topic keyed by recipient, with the
//! recipient repeated in a header for subscriber-side filtering.

use crate::config::KafkaConfig;
use crate::dispatch::{Dispatcher, NotificationMessage, Notifier};
use crate::error::GalleryError;
use crate::model::ProcessingEvent;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Message to be sent to Kafka
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutgoingMessage {
    /// Create a new outgoing message with a JSON payload
    pub fn new_json<T: serde::Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        message: &T,
    ) -> Result<Self, GalleryError> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| GalleryError::Validation(format!("unserializable message: {e}")))?;
        Ok(Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        })
    }

    /// Add a header to the message
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Add a message type header
    pub fn with_message_type(self, msg_type: impl Into<String>) -> Self {
        self.with_header("message-type", msg_type)
    }
}

/// Kafka producer for processing events and notifications
pub struct GalleryProducer {
    producer: FutureProducer,
    processing_topic: String,
    notification_topic: String,
    timeout: Duration,
}

impl GalleryProducer {
    pub fn new(config: &KafkaConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = producer_config(config).create()?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            processing_topic = %config.processing_topic,
            notification_topic = %config.notification_topic,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            processing_topic: config.processing_topic.clone(),
            notification_topic: config.notification_topic.clone(),
            timeout: config.message_timeout(),
        })
    }

    /// Send a message and wait for the broker to acknowledge it
    #[instrument(skip(self, message), fields(topic = %message.topic, key = %message.key))]
    pub async fn send(&self, message: OutgoingMessage) -> Result<(), GalleryError> {
        let headers = message
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_str()),
                })
            });

        let record = FutureRecord::to(&message.topic)
            .key(&message.key)
            .payload(&message.payload)
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| {
                GalleryError::TransientStore(format!("send to {}: {e}", message.topic))
            })?;

        debug!(partition, offset, "Message delivered");
        Ok(())
    }

    /// Flush all pending messages
    pub fn flush(&self, timeout: Duration) -> Result<(), GalleryError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| GalleryError::TransientStore(format!("flush producer: {e}")))
    }
}

impl Drop for GalleryProducer {
    fn drop(&mut self) {
        if let Err(e) = self.flush(Duration::from_secs(5)) {
            warn!(error = %e, "Failed to flush producer on shutdown");
        }
    }
}

#[async_trait]
impl Dispatcher for GalleryProducer {
    async fn dispatch(&self, event: ProcessingEvent) -> Result<(), GalleryError> {
        let message = processing_message(&self.processing_topic, &event)?;
        self.send(message).await
    }
}

#[async_trait]
impl Notifier for GalleryProducer {
    async fn notify(&self, notification: NotificationMessage) -> Result<(), GalleryError> {
        let message = notification_message(&self.notification_topic, &notification)?;
        self.send(message).await
    }
}

fn processing_message(topic: &str, event: &ProcessingEvent) -> Result<OutgoingMessage, GalleryError> {
    Ok(OutgoingMessage::new_json(topic, &event.object_key, event)?
        .with_message_type("processing_event")
        .with_header("retry-attempt", event.retry_attempt.to_string()))
}

fn notification_message(
    topic: &str,
    notification: &NotificationMessage,
) -> Result<OutgoingMessage, GalleryError> {
    Ok(
        OutgoingMessage::new_json(topic, &notification.recipient, notification)?
            .with_message_type("notification")
            .with_header("recipient", &notification.recipient)
            .with_header("subject", &notification.subject)
            .with_header("workflow-type", &notification.workflow_type),
    )
}

fn producer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("message.timeout.ms", config.message_timeout_ms.to_string())
        .set("enable.idempotence", "true")
        .set("acks", "all");

    apply_security(&mut client_config, config);
    client_config
}

/// SSL and SASL settings shared by producer and consumer
pub(crate) fn apply_security(client_config: &mut ClientConfig, config: &KafkaConfig) {
    if config.ssl_enabled {
        client_config.set("security.protocol", "SASL_SSL");
        if let Some(ref ca_location) = config.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    if let (Some(ref username), Some(ref password)) =
        (&config.sasl_username, &config.sasl_password)
    {
        client_config
            .set("sasl.mechanisms", "PLAIN")
            .set("sasl.username", username)
            .set("sasl.password", password);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(message: &'a OutgoingMessage, key: &str) -> Option<&'a str> {
        message
            .headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_processing_message_keyed_by_object() {
        let event = ProcessingEvent::new("abc123", "staging", "u@example.com", "Ada").next_attempt();
        let message = processing_message("gallery.processing.events", &event).unwrap();

        assert_eq!(message.key, "abc123");
        assert_eq!(header(&message, "retry-attempt"), Some("1"));

        let decoded: ProcessingEvent = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_notification_message_carries_recipient_headers() {
        let notification = NotificationMessage::new("Delayed", "u@example.com", "soon");
        let message = notification_message("gallery.notifications", &notification).unwrap();

        assert_eq!(message.key, "u@example.com");
        assert_eq!(header(&message, "recipient"), Some("u@example.com"));
        assert_eq!(header(&message, "workflow-type"), Some("publishSNS"));
        assert_eq!(header(&message, "message-type"), Some("notification"));
    }

    #[test]
    fn test_producer_config_security() {
        let config: KafkaConfig = serde_json::from_value(serde_json::json!({
            "bootstrap_servers": "broker:9092",
            "ssl_enabled": true,
            "sasl_username": "svc",
            "sasl_password": "secret"
        }))
        .unwrap();

        let client_config = producer_config(&config);
        assert_eq!(client_config.get("bootstrap.servers"), Some("broker:9092"));
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.username"), Some("svc"));
    }
}
