//! Outbound seams of the pipeline: re-dispatching processing events and
//! notifying users.

use crate::error::GalleryError;
use crate::model::ProcessingEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Workflow tag the notification fan-out routes on
pub const NOTIFICATION_WORKFLOW: &str = "publishSNS";

/// Submit-and-forget scheduler for processing events.
///
/// An accepted event runs later, at least once. Nothing is awaited beyond
/// the hand-off.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, event: ProcessingEvent) -> Result<(), GalleryError>;
}

/// Publisher onto the notification channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: NotificationMessage) -> Result<(), GalleryError>;
}

/// Message for the notification fan-out; subscribers filter on `recipient`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub subject: String,
    pub recipient: String,
    /// HTML body
    pub body: String,
    pub workflow_type: String,
}

impl NotificationMessage {
    pub fn new(subject: impl Into<String>, recipient: impl Into<String>, message: &str) -> Self {
        let subject = subject.into();
        let body = format!("<html><body><h1>{subject}</h1><p>{message}</p></body></html>");
        Self {
            subject,
            recipient: recipient.into(),
            body,
            workflow_type: NOTIFICATION_WORKFLOW.to_string(),
        }
    }

    /// Sent once when processing of an upload keeps failing
    pub fn processing_delayed(event: &ProcessingEvent) -> Self {
        Self::new(
            "Image processing delayed",
            &event.owner,
            &format!(
                "Hi {}, we could not finish processing your photo yet. \
                 We will keep trying in the background.",
                event.display_name
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let message = NotificationMessage::new("Hello", "u@example.com", "body text");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["subject"], "Hello");
        assert_eq!(value["recipient"], "u@example.com");
        assert_eq!(value["workflowType"], "publishSNS");
        assert_eq!(
            value["body"],
            "<html><body><h1>Hello</h1><p>body text</p></body></html>"
        );
    }

    #[test]
    fn test_processing_delayed_targets_owner() {
        let event = ProcessingEvent::new("abc123", "staging", "u@example.com", "Ada");
        let message = NotificationMessage::processing_delayed(&event);
        assert_eq!(message.recipient, "u@example.com");
        assert!(message.body.contains("Ada"));
    }
}
