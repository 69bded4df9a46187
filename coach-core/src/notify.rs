use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Templated e-mail handed to the delivery collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub template: String,
    pub to: String,
    pub subject: String,
    pub context: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification has no recipient")]
    NoRecipient,
    #[error("notification transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if notification.to.is_empty() {
            return Err(NotifyError::NoRecipient);
        }
        tracing::info!(
            template = %notification.template,
            to = %coach_shared::Masked::new(notification.to.as_str()),
            subject = %notification.subject,
            "Notification ready for delivery"
        );
        Ok(())
    }
}
