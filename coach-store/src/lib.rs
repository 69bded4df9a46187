pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod events;
pub mod memory;
pub mod redis_repo;

pub use booking_repo::PgBookingLedger;
pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use memory::{InMemoryBookingLedger, InMemorySeatLockStore};
pub use redis_repo::RedisClient;
