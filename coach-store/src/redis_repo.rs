use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use coach_core::hold::{hold_key, HoldOutcome, SeatHold};
use coach_core::repository::{SeatLockStore, StoreResult};
use coach_core::StoreError;
use redis::AsyncCommands;
use tracing::{debug, info};

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(format!("redis: {}", e))
}

fn decode(key: &str, raw: &str) -> StoreResult<SeatHold> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("{}: {}", key, e)))
}

/// One SET NX round against a hold key.
enum HoldAttempt {
    Held,
    Taken(String),
    /// The blocking key expired between SET and GET.
    Vanished,
}

/// Runs SET NX rounds until the key is written or a live hold is read back.
/// A key that vanishes mid-round gets exactly one more round.
async fn hold_with_retry<F, Fut>(key: &str, mut attempt: F) -> StoreResult<HoldOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<HoldAttempt>>,
{
    for round in 1..=2 {
        match attempt().await? {
            HoldAttempt::Held => return Ok(HoldOutcome::Held),
            HoldAttempt::Taken(raw) => return Ok(HoldOutcome::Conflict(decode(key, &raw)?)),
            HoldAttempt::Vanished => debug!(key, round, "Hold key expired between SET and GET"),
        }
    }
    Err(StoreError::Unavailable(format!("{} keeps changing during hold", key)))
}

#[async_trait]
impl SeatLockStore for RedisClient {
    async fn try_hold(
        &self,
        trip_id: i64,
        seat_id: i64,
        hold: &SeatHold,
        ttl: Duration,
    ) -> StoreResult<HoldOutcome> {
        let conn = self.conn().await?;
        let key = hold_key(trip_id, seat_id);
        let value =
            serde_json::to_string(hold).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let outcome = hold_with_retry(&key, || {
            let mut conn = conn.clone();
            let key = key.clone();
            let value = value.clone();
            async move {
                // SET NX: only set if key does not exist
                let result: Option<String> = redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await
                    .map_err(unavailable)?;
                if result.is_some() {
                    return Ok(HoldAttempt::Held);
                }
                let existing: Option<String> = conn.get(&key).await.map_err(unavailable)?;
                Ok(existing.map_or(HoldAttempt::Vanished, HoldAttempt::Taken))
            }
        })
        .await?;

        if outcome == HoldOutcome::Held {
            info!("Seat hold set: {} -> {}", key, hold.booking_id);
        }
        Ok(outcome)
    }

    async fn release(&self, trip_id: i64, seat_id: i64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let key = hold_key(trip_id, seat_id);
        conn.del::<_, ()>(&key).await.map_err(unavailable)?;
        debug!("Seat hold released: {}", key);
        Ok(())
    }

    async fn peek(&self, trip_id: i64, seat_id: i64) -> StoreResult<Option<SeatHold>> {
        let mut conn = self.conn().await?;
        let key = hold_key(trip_id, seat_id);
        let raw: Option<String> = conn.get(&key).await.map_err(unavailable)?;
        raw.map(|r| decode(&key, &r)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn stored_hold() -> String {
        serde_json::to_string(&SeatHold {
            booking_id: Uuid::new_v4(),
            holder_name: "Vo Thi E".into(),
            expires_at: Utc::now(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_vanished_key_gets_one_more_round() {
        let mut rounds = vec![HoldAttempt::Held, HoldAttempt::Vanished];
        let outcome = hold_with_retry("seat:1:2", || {
            let next = rounds.pop();
            async move { next.ok_or_else(|| StoreError::Unavailable("no round".into())) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, HoldOutcome::Held);
        assert!(rounds.is_empty());

        let mut rounds = vec![HoldAttempt::Taken(stored_hold()), HoldAttempt::Vanished];
        let outcome = hold_with_retry("seat:1:2", || {
            let next = rounds.pop();
            async move { next.ok_or_else(|| StoreError::Unavailable("no round".into())) }
        })
        .await
        .unwrap();
        match outcome {
            HoldOutcome::Conflict(hold) => assert_eq!(hold.holder_name, "Vo Thi E"),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_key_vanishing_twice_fails_closed() {
        let outcome = hold_with_retry("seat:1:2", || async { Ok(HoldAttempt::Vanished) }).await;
        assert!(matches!(outcome, Err(StoreError::Unavailable(_))));
    }
}
