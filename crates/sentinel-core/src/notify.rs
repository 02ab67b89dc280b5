//! Outbound notifications (verification and password-reset links).
//!
//! Delivery is fire-and-forget from the core's point of view: a failure is
//! returned to the caller and never retried here.

use std::sync::{Arc, Mutex};

use crate::error::SentinelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    EmailVerification,
    PasswordReset,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        link: &str,
    ) -> Result<(), SentinelError>;

    async fn send_verification(&self, recipient: &str, link: &str) -> Result<(), SentinelError> {
        self.send(NotificationKind::EmailVerification, recipient, link)
            .await
    }

    async fn send_password_reset(&self, recipient: &str, link: &str) -> Result<(), SentinelError> {
        self.send(NotificationKind::PasswordReset, recipient, link)
            .await
    }
}

/// Writes the link to the log instead of delivering it. Development only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        link: &str,
    ) -> Result<(), SentinelError> {
        tracing::info!(?kind, %recipient, %link, "notification (not delivered)");
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub link: String,
}

impl SentNotification {
    /// Value of the `token` query parameter in the link, if any.
    pub fn token(&self) -> Option<&str> {
        let (_, query) = self.link.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    }
}

/// Keeps every notification in memory so tests can read the links back.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Most recent notification of `kind` sent to `recipient`.
    pub fn last_for(&self, recipient: &str, kind: NotificationKind) -> Option<SentNotification> {
        self.sent()
            .into_iter()
            .rev()
            .find(|n| n.recipient == recipient && n.kind == kind)
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        link: &str,
    ) -> Result<(), SentinelError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentNotification {
                kind,
                recipient: recipient.to_string(),
                link: link.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_notifier_extracts_token() {
        let notifier = RecordingNotifier::new();
        notifier
            .send_password_reset("a@x.com", "http://localhost/reset-password?token=abc123")
            .await
            .unwrap();

        let sent = notifier
            .last_for("a@x.com", NotificationKind::PasswordReset)
            .unwrap();
        assert_eq!(sent.token(), Some("abc123"));
        assert!(notifier
            .last_for("a@x.com", NotificationKind::EmailVerification)
            .is_none());
    }
}
