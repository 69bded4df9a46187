use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use coach_api::{app, metrics::Metrics, worker, AppState, AuthConfig};
use coach_booking::OutboxDispatcher;
use coach_core::clock::{Clock, SystemClock};
use coach_core::notify::{LogNotifier, Notifier};
use coach_core::outbox::{EventPublisher, LogPublisher};
use coach_core::payment::VnPayGateway;
use coach_core::repository::{BookingLedger, SeatLockStore};
use coach_store::app_config::{Config, StoreBackend};
use coach_store::{
    DbClient, EventProducer, InMemoryBookingLedger, InMemorySeatLockStore, KafkaNotifier,
    RedisClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Backend {
    ledger: Arc<dyn BookingLedger>,
    locks: Arc<dyn SeatLockStore>,
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
}

async fn connect(config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Backend> {
    match config.store.backend {
        StoreBackend::Postgres => {
            let db = DbClient::connect(&config.database)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;

            let redis = RedisClient::new(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?;

            let kafka = EventProducer::new(&config.kafka.brokers)
                .context("Failed to create Kafka producer")?;

            Ok(Backend {
                ledger: Arc::new(db.ledger()),
                locks: Arc::new(redis),
                publisher: Arc::new(kafka.clone()),
                notifier: Arc::new(KafkaNotifier::new(kafka)),
            })
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, bookings are lost on restart");
            Ok(Backend {
                ledger: Arc::new(InMemoryBookingLedger::new()),
                locks: Arc::new(InMemorySeatLockStore::new(clock)),
                publisher: Arc::new(LogPublisher),
                notifier: Arc::new(LogNotifier),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "coach_api=debug,coach_booking=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting coach booking API on port {}", config.server.port);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend = connect(&config, clock.clone()).await?;
    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let app_state = AppState::new(
        backend.ledger.clone(),
        backend.locks,
        Arc::new(VnPayGateway::new(config.payment.clone())),
        clock.clone(),
        config.booking.clone(),
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        metrics,
    );

    let dispatcher = OutboxDispatcher::new(backend.ledger, backend.publisher, backend.notifier, clock);
    tokio::spawn(worker::start_outbox_worker(dispatcher, config.outbox.clone()));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
