use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

use crate::app_config::DatabaseConfig;
use crate::booking_repo::PgBookingLedger;

/// Postgres pool shared by the booking ledger.
#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;
        info!(max_connections = config.max_connections, "Connected to Postgres");

        Ok(Self { pool })
    }

    /// Applies `migrations/` (ledger tables, trip seats, outbox).
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running ledger migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Ledger schema is up to date.");
        Ok(())
    }

    pub fn ledger(&self) -> PgBookingLedger {
        PgBookingLedger::new(self.pool.clone())
    }
}
