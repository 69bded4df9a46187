use std::sync::Arc;

use coach_core::clock::Clock;
use coach_core::notify::Notifier;
use coach_core::outbox::{EventPublisher, OutboxMessage, Outgoing};
use coach_core::repository::BookingLedger;
use coach_core::{BookingError, CoreResult};

/// Emails are dropped after this many failed deliveries. Events retry forever.
pub const MAX_EMAIL_ATTEMPTS: i32 = 5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Sends committed outbox messages. At-least-once: a message is marked
/// dispatched only after the sink accepted it.
pub struct OutboxDispatcher {
    ledger: Arc<dyn BookingLedger>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl OutboxDispatcher {
    pub fn new(
        ledger: Arc<dyn BookingLedger>,
        publisher: Arc<dyn EventPublisher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            notifier,
            clock,
        }
    }

    pub async fn run_once(&self, batch_size: usize) -> CoreResult<DispatchReport> {
        let pending = self
            .ledger
            .pending_outbox(batch_size)
            .await
            .map_err(BookingError::store("load outbox"))?;

        let mut report = DispatchReport::default();
        for message in pending {
            match self.deliver(&message).await {
                Ok(()) => {
                    self.ledger
                        .mark_outbox_dispatched(message.id, self.clock.now())
                        .await
                        .map_err(BookingError::store("mark outbox dispatched"))?;
                    report.dispatched += 1;
                }
                Err(reason) => {
                    self.ledger
                        .mark_outbox_failed(message.id, &reason)
                        .await
                        .map_err(BookingError::store("mark outbox failed"))?;

                    let gave_up = matches!(message.body, Outgoing::Email(_))
                        && message.attempts + 1 >= MAX_EMAIL_ATTEMPTS;
                    if gave_up {
                        tracing::error!(id = %message.id, %reason, "Giving up on notification");
                        self.ledger
                            .mark_outbox_dispatched(message.id, self.clock.now())
                            .await
                            .map_err(BookingError::store("retire outbox message"))?;
                        report.abandoned += 1;
                    } else {
                        tracing::warn!(
                            id = %message.id,
                            kind = message.body.kind(),
                            attempts = message.attempts + 1,
                            %reason,
                            "Outbox delivery failed, will retry"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn deliver(&self, message: &OutboxMessage) -> Result<(), String> {
        match &message.body {
            Outgoing::Event {
                topic,
                key,
                payload,
            } => self
                .publisher
                .publish(topic, key, &payload.to_string())
                .await
                .map_err(|e| e.to_string()),
            Outgoing::Email(notification) => self
                .notifier
                .send(notification)
                .await
                .map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use coach_core::clock::SystemClock;
    use coach_core::notify::{Notification, NotifyError};
    use coach_core::outbox::PublishError;
    use coach_store::memory::InMemoryBookingLedger;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl EventPublisher for Recorder {
        async fn publish(&self, topic: &str, _key: &str, _payload: &str) -> Result<(), PublishError> {
            if self.fail {
                return Err(PublishError {
                    topic: topic.into(),
                    reason: "broker down".into(),
                });
            }
            self.published.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Transport("smtp down".into()));
            }
            self.published.lock().unwrap().push(n.template.clone());
            Ok(())
        }
    }

    async fn seed(ledger: &InMemoryBookingLedger) {
        let now = Utc::now();
        let mut tx = ledger.begin().await.unwrap();
        tx.enqueue(Outgoing::event("booking.created", "BOOK1", &serde_json::json!({})), now)
            .await
            .unwrap();
        tx.enqueue(
            Outgoing::Email(Notification {
                template: "payment_success".into(),
                to: "a@example.com".into(),
                subject: "s".into(),
                context: serde_json::json!({}),
            }),
            now,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatches_and_marks() {
        let ledger = Arc::new(InMemoryBookingLedger::new());
        seed(&ledger).await;
        let sink = Arc::new(Recorder::default());
        let dispatcher =
            OutboxDispatcher::new(ledger.clone(), sink.clone(), sink.clone(), Arc::new(SystemClock));

        let report = dispatcher.run_once(10).await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(
            *sink.published.lock().unwrap(),
            vec!["booking.created".to_string(), "payment_success".to_string()]
        );
        assert_eq!(dispatcher.run_once(10).await.unwrap(), DispatchReport::default());
    }

    #[tokio::test]
    async fn test_failing_email_is_abandoned_events_are_not() {
        let ledger = Arc::new(InMemoryBookingLedger::new());
        seed(&ledger).await;
        let sink = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let dispatcher =
            OutboxDispatcher::new(ledger.clone(), sink.clone(), sink.clone(), Arc::new(SystemClock));

        for _ in 0..MAX_EMAIL_ATTEMPTS - 1 {
            let report = dispatcher.run_once(10).await.unwrap();
            assert_eq!(report.failed, 2);
        }
        let report = dispatcher.run_once(10).await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.failed, 1);

        let pending = ledger.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].body, Outgoing::Event { .. }));
    }
}
