use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notify::Notification;

/// Side effect recorded inside a ledger transaction and sent after commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outgoing {
    Event {
        topic: String,
        key: String,
        payload: serde_json::Value,
    },
    Email(Notification),
}

impl Outgoing {
    pub fn event<T: Serialize>(topic: &str, key: impl Into<String>, payload: &T) -> Self {
        Outgoing::Event {
            topic: topic.to_string(),
            key: key.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outgoing::Event { .. } => "event",
            Outgoing::Email(_) => "email",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub body: Outgoing,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to publish to {topic}: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Domain event sink (Kafka in production).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError>;
}

/// Logs events instead of publishing them. Used with the in-memory backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        tracing::info!(%topic, %key, bytes = payload.len(), "Event published to log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_tagging() {
        let msg = Outgoing::event("booking.created", "BOOK1", &serde_json::json!({"a": 1}));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "event");
        assert_eq!(json["topic"], "booking.created");

        let back: Outgoing = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), "event");
    }
}
