//! Outbound notifications (publish announcements and the like).
//!
//! Delivery mechanics (SMTP, templates) are not part of the job system; the
//! worker process logs notifications unless a real transport is plugged in.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

fn check_recipient(recipient: &str) -> Result<(), NotifyError> {
    let trimmed = recipient.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(NotifyError::InvalidRecipient(recipient.to_string())),
    }
}

/// Emits each notification as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        check_recipient(&notification.recipient)?;
        info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification sent"
        );
        Ok(())
    }
}

/// Keeps every notification in memory (dev/tests).
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        check_recipient(&notification.recipient)?;
        self.sent
            .lock()
            .map_err(|_| NotifyError::Delivery("recording notifier lock poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(to: &str) -> Notification {
        Notification {
            recipient: to.to_string(),
            subject: "Drawings published".to_string(),
            body: "3 drawings".to_string(),
        }
    }

    #[tokio::test]
    async fn recording_notifier_keeps_messages() {
        let notifier = RecordingNotifier::new();
        notifier.send(note("pm@example.com")).await.unwrap();
        assert_eq!(notifier.sent(), vec![note("pm@example.com")]);
    }

    #[tokio::test]
    async fn rejects_malformed_recipients() {
        let err = LogNotifier.send(note("not-an-address")).await.unwrap_err();
        assert_eq!(err, NotifyError::InvalidRecipient("not-an-address".to_string()));
    }
}
