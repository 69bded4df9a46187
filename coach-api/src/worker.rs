use std::time::Duration;

use coach_booking::OutboxDispatcher;
use coach_store::app_config::OutboxConfig;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Polls the outbox and hands committed messages to Kafka and the notifier.
/// Runs until the process exits.
pub async fn start_outbox_worker(dispatcher: OutboxDispatcher, config: OutboxConfig) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        poll_interval_ms = config.poll_interval_ms,
        batch_size = config.batch_size,
        "Outbox worker started"
    );

    loop {
        ticker.tick().await;
        match dispatcher.run_once(config.batch_size).await {
            Ok(report) if report.dispatched + report.failed + report.abandoned > 0 => {
                debug!(
                    dispatched = report.dispatched,
                    failed = report.failed,
                    abandoned = report.abandoned,
                    "Outbox batch processed"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Outbox poll failed: {}", e),
        }
    }
}
