use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short-lived claim on one seat of one trip, stored in the seat lock store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatHold {
    pub booking_id: Uuid,
    pub holder_name: String,
    pub expires_at: DateTime<Utc>,
}

impl SeatHold {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Held,
    /// Somebody else holds the seat; carries their hold.
    Conflict(SeatHold),
}

/// One seat that blocked a booking attempt. `expires_at` is `None` when the
/// seat is already sold rather than held.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatConflict {
    pub seat_id: i64,
    pub seat_name: String,
    pub held_by: String,
    pub expires_at: Option<DateTime<Utc>>,
}

pub fn hold_key(trip_id: i64, seat_id: i64) -> String {
    format!("seat:{}:{}", trip_id, seat_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_hold_key_format() {
        assert_eq!(hold_key(42, 7), "seat:42:7");
    }

    #[test]
    fn test_hold_expiry_boundary() {
        let now = Utc::now();
        let hold = SeatHold {
            booking_id: Uuid::new_v4(),
            holder_name: "Le Van C".into(),
            expires_at: now + Duration::seconds(1),
        };
        assert!(hold.is_live(now));
        assert!(!hold.is_live(now + Duration::seconds(1)));
    }
}
